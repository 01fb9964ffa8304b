// Player economy: balances, shop transactions and escrow trades.
//
// - `core/` = Business logic and storage traits (engine-agnostic)
// - `infra/` = Implementations of core traits (SQLite, in-memory)
// - `config` = Environment-driven settings for the composition root

//! Embedding in a game server, which supplies its own `GameWorld`:
//!
//! ```no_run
//! use economy_engine::config::EconomyConfig;
//! use economy_engine::core::commission::CommissionManager;
//! use economy_engine::core::ledger::BalanceLedger;
//! use economy_engine::core::shop::{ShopListing, ShopTransactionEngine};
//! use economy_engine::core::trade::TradeManager;
//! use economy_engine::core::world::{GameWorld, Location};
//! use economy_engine::infra::database;
//! use economy_engine::infra::ledger::SqliteBalanceStore;
//! use economy_engine::infra::shop::SqliteSaleLog;
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! async fn start(world: Arc<dyn GameWorld>) -> anyhow::Result<()> {
//!     let config = EconomyConfig::from_env();
//!     let pool = database::connect(&config.database_url, config.max_connections).await?;
//!     let balances = SqliteBalanceStore::new(pool.clone());
//!     balances.migrate().await?;
//!     let sales = SqliteSaleLog::new(pool);
//!     sales.migrate().await?;
//!
//!     let ledger = Arc::new(
//!         BalanceLedger::new(balances).with_starting_balance(config.starting_balance),
//!     );
//!     let shops = ShopTransactionEngine::new(
//!         Arc::clone(&ledger),
//!         Arc::new(CommissionManager::new(config.default_fees)),
//!         Arc::new(sales),
//!         Arc::clone(&world),
//!         config.platform_account,
//!     );
//!     let trades = TradeManager::new(ledger, world, config.trade.clone());
//!
//!     let placed = Location::new("overworld", 10.0, 64.0, -3.0);
//!     let shop = Mutex::new(ShopListing::new(placed, None, config.new_shop_stock()));
//!     # let _ = (shops, trades, shop);
//!     Ok(())
//! }
//! ```

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;

pub mod config;
