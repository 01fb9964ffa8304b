// This is the entry point of the economy admin tool.
//
// **Architecture Overview:**
// - `core/` = Business logic (engine-agnostic)
// - `infra/` = Implementations of core traits (SQLite)
// - `config` = Environment settings
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Run one administrative command against the shared database
//
// The game server embeds the library directly and supplies its own
// `GameWorld`; this binary only touches balances, fees and sale history.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use economy_engine::config::EconomyConfig;
use economy_engine::core::commission::{CommissionManager, FeeRates};
use economy_engine::core::ledger::{
    format_amount, parse_amount, AccountId, Amount, BalanceLedger, ReasonCode,
};
use economy_engine::core::shop::SaleLogStore;
use economy_engine::infra::commission::SqliteCommissionStore;
use economy_engine::infra::database;
use economy_engine::infra::ledger::SqliteBalanceStore;
use economy_engine::infra::shop::SqliteSaleLog;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Administer the player economy database
#[derive(Parser, Debug)]
#[command(name = "economy")]
#[command(about = "Administer the player economy database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show an account's balance
    Balance { account: AccountId },

    /// Overwrite an account's balance
    SetBalance {
        account: AccountId,
        #[arg(value_parser = amount_arg)]
        amount: Amount,
        /// Display name used if the account does not exist yet
        #[arg(long, default_value = "unknown")]
        name: String,
    },

    /// Credit an account
    Give {
        account: AccountId,
        #[arg(value_parser = amount_arg)]
        amount: Amount,
    },

    /// Debit an account, stopping at zero
    Take {
        account: AccountId,
        #[arg(value_parser = amount_arg)]
        amount: Amount,
    },

    /// Move money between two accounts
    Pay {
        from: AccountId,
        to: AccountId,
        #[arg(value_parser = amount_arg)]
        amount: Amount,
    },

    /// Recent balance changes, newest first
    History {
        account: AccountId,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Richest accounts
    Top {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Sale history of one shop, e.g. `overworld:10,64,-3`
    Sales {
        shop: String,
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        page_size: usize,
    },

    /// Commission overrides
    Fee {
        #[command(subcommand)]
        action: FeeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FeeCommand {
    /// Effective rates for an account
    Show { account: AccountId },
    /// Give an account its own rates, in basis points
    Set {
        account: AccountId,
        sell_bps: u32,
        buy_bps: u32,
    },
    /// Return an account to the default rates
    Clear { account: AccountId },
}

fn amount_arg(raw: &str) -> Result<Amount, String> {
    parse_amount(raw).ok_or_else(|| format!("'{}' is not an amount like 12 or 12.50", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EconomyConfig::from_env();

    // Initialize storage
    let pool = database::connect(&config.database_url, config.max_connections).await?;

    let balance_store = SqliteBalanceStore::new(pool.clone());
    balance_store.migrate().await?;
    let commission_store = SqliteCommissionStore::new(pool.clone());
    commission_store.migrate().await?;
    let sale_log = SqliteSaleLog::new(pool);
    sale_log.migrate().await?;

    // Initialize services
    let ledger = BalanceLedger::new(balance_store).with_starting_balance(config.starting_balance);
    ledger
        .ensure_system_account(config.platform_account, &config.platform_name)
        .await?;

    let commission =
        CommissionManager::with_store(config.default_fees, Arc::new(commission_store)).await?;
    // Configured overrides only fill gaps; rates set at runtime win.
    for (account, rates) in &config.fee_overrides {
        if commission.override_for(*account).is_none() {
            commission.set_override(*account, *rates).await?;
        }
    }

    match cli.command {
        Command::Balance { account } => {
            let balance = ledger.refresh_balance(account).await?;
            println!("{} {}", account, format_amount(balance));
        }
        Command::SetBalance {
            account,
            amount,
            name,
        } => {
            let balance = ledger.set_balance(account, amount, &name, None).await?;
            println!("{} {}", account, format_amount(balance));
        }
        Command::Give { account, amount } => {
            let balance = ledger.add_balance(account, amount, None).await?;
            println!("{} {}", account, format_amount(balance));
        }
        Command::Take { account, amount } => {
            let balance = ledger.remove_balance(account, amount, None).await?;
            println!("{} {}", account, format_amount(balance));
        }
        Command::Pay { from, to, amount } => {
            for entry in ledger
                .transfer(from, to, amount, ReasonCode::Transfer)
                .await?
            {
                println!("{} {}", entry.account, format_amount(entry.balance_after));
            }
        }
        Command::History { account, limit } => {
            for entry in ledger.history(account, limit).await? {
                println!(
                    "{}  {:<16} {:>12} -> {:>12}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.reason.as_str(),
                    format_amount(entry.delta),
                    format_amount(entry.balance_after),
                );
            }
        }
        Command::Top { limit } => {
            for (rank, account) in ledger.top_balances(limit).await?.iter().enumerate() {
                println!(
                    "{:>3}. {:<20} {:>12}",
                    rank + 1,
                    account.name,
                    format_amount(account.balance)
                );
            }
        }
        Command::Sales {
            shop,
            page,
            page_size,
        } => {
            let total = sale_log.count(&shop).await?;
            println!("{} sale(s) recorded for {}", total, shop);
            for sale in sale_log.page(&shop, page, page_size).await? {
                println!(
                    "{}  {} {} lot(s) of [{}] for {} (fee {}) owner={} customer={}",
                    sale.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    sale.direction,
                    sale.lots,
                    sale.summary(),
                    format_amount(sale.total),
                    format_amount(sale.fee),
                    sale.owner,
                    sale.customer,
                );
            }
        }
        Command::Fee { action } => match action {
            FeeCommand::Show { account } => {
                let rates = commission
                    .override_for(account)
                    .unwrap_or_else(|| commission.defaults());
                let source = if commission.override_for(account).is_some() {
                    "override"
                } else {
                    "default"
                };
                println!(
                    "{} sell={}bps buy={}bps ({})",
                    account, rates.sell_bps, rates.buy_bps, source
                );
            }
            FeeCommand::Set {
                account,
                sell_bps,
                buy_bps,
            } => {
                commission
                    .set_override(account, FeeRates::new(sell_bps, buy_bps))
                    .await?;
                println!("{} sell={}bps buy={}bps", account, sell_bps, buy_bps);
            }
            FeeCommand::Clear { account } => {
                if !commission.clear_override(account).await? {
                    bail!("{} has no fee override", account);
                }
                println!("{} back to default rates", account);
            }
        },
    }

    Ok(())
}
