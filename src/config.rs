// Economy configuration, read from the environment after `.env` is loaded.
//
// Every value has a default. A value that is present but unreadable is
// logged and replaced by its default rather than stopping startup.

use crate::core::commission::{parse_override_list, FeeRates};
use crate::core::items::{Inventory, DEFAULT_STACK_LIMIT};
use crate::core::ledger::{parse_amount, AccountId, Amount};
use crate::core::trade::TradeConfig;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PLATFORM_ACCOUNT: AccountId = AccountId::from_u128(1);

#[derive(Debug, Clone)]
pub struct EconomyConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub starting_balance: Amount,
    pub platform_account: AccountId,
    pub platform_name: String,
    pub default_fees: FeeRates,
    /// Seeded into the commission manager at startup.
    pub fee_overrides: Vec<(AccountId, FeeRates)>,
    /// Size of a new shop's stock container, see `new_shop_stock`.
    pub shop_stock_slots: usize,
    pub stack_limit: u32,
    /// Handed to `TradeManager::new` by the embedding server.
    pub trade: TradeConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/economy.db".to_string(),
            max_connections: 5,
            starting_balance: 0,
            platform_account: DEFAULT_PLATFORM_ACCOUNT,
            platform_name: "Server".to_string(),
            default_fees: FeeRates::default(),
            fee_overrides: Vec::new(),
            shop_stock_slots: 27,
            stack_limit: DEFAULT_STACK_LIMIT,
            trade: TradeConfig::default(),
        }
    }
}

impl EconomyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let stack_limit = parse_or(&read, "ITEM_STACK_LIMIT", defaults.stack_limit).max(1);
        let trade = TradeConfig {
            request_ttl: Duration::from_secs(parse_or(
                &read,
                "TRADE_REQUEST_TTL_SECS",
                defaults.trade.request_ttl.as_secs(),
            )),
            max_distance: parse_or(&read, "TRADE_MAX_DISTANCE", defaults.trade.max_distance),
            offer_slots: parse_or(&read, "TRADE_OFFER_SLOTS", defaults.trade.offer_slots),
            stack_limit,
        };

        let starting_balance = match read("ECONOMY_STARTING_BALANCE") {
            Some(raw) => match parse_amount(&raw) {
                Some(amount) if amount >= 0 => amount,
                _ => {
                    tracing::warn!(value = %raw, "Invalid ECONOMY_STARTING_BALANCE, using default");
                    defaults.starting_balance
                }
            },
            None => defaults.starting_balance,
        };

        let fee_overrides = read("ECONOMY_FEE_OVERRIDES")
            .map(|raw| parse_override_list(&raw))
            .unwrap_or_default();

        Self {
            database_url: read("ECONOMY_DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_or(&read, "ECONOMY_MAX_CONNECTIONS", defaults.max_connections),
            starting_balance,
            platform_account: parse_or(&read, "ECONOMY_PLATFORM_ACCOUNT", defaults.platform_account),
            platform_name: read("ECONOMY_PLATFORM_NAME").unwrap_or(defaults.platform_name),
            default_fees: FeeRates::new(
                parse_or(&read, "ECONOMY_SELL_FEE_BPS", defaults.default_fees.sell_bps),
                parse_or(&read, "ECONOMY_BUY_FEE_BPS", defaults.default_fees.buy_bps),
            ),
            fee_overrides,
            shop_stock_slots: parse_or(&read, "SHOP_STOCK_SLOTS", defaults.shop_stock_slots),
            stack_limit,
            trade,
        }
    }

    /// Empty stock container for a newly placed shop.
    pub fn new_shop_stock(&self) -> Inventory {
        Inventory::with_stack_limit(self.shop_stock_slots, self.stack_limit)
    }
}

fn parse_or<T: FromStr>(read: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match read(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> EconomyConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EconomyConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.database_url, "sqlite://data/economy.db");
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.platform_account, DEFAULT_PLATFORM_ACCOUNT);
        assert_eq!(cfg.default_fees, FeeRates::default());
        assert_eq!(cfg.trade.request_ttl, Duration::from_secs(60));
        assert_eq!(cfg.trade.max_distance, 16.0);
        assert_eq!(cfg.shop_stock_slots, 27);
        assert_eq!(cfg.stack_limit, 64);
    }

    #[test]
    fn values_are_read_and_bad_ones_fall_back() {
        let cfg = config(&[
            ("ECONOMY_DATABASE_URL", "sqlite::memory:"),
            ("ECONOMY_MAX_CONNECTIONS", "many"),
            ("ECONOMY_STARTING_BALANCE", "12.50"),
            ("ECONOMY_SELL_FEE_BPS", "250"),
            ("ECONOMY_BUY_FEE_BPS", "-3"),
            (
                "ECONOMY_FEE_OVERRIDES",
                "00000000-0000-0000-0000-000000000007:0:100",
            ),
            ("TRADE_REQUEST_TTL_SECS", "30"),
            ("ITEM_STACK_LIMIT", "16"),
        ]);

        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.starting_balance, 1_250);
        assert_eq!(cfg.default_fees, FeeRates::new(250, 0));
        assert_eq!(
            cfg.fee_overrides,
            vec![(AccountId::from_u128(7), FeeRates::new(0, 100))]
        );
        assert_eq!(cfg.trade.request_ttl, Duration::from_secs(30));
        assert_eq!(cfg.trade.stack_limit, 16);
    }

    #[test]
    fn shop_stock_follows_the_configured_shape() {
        let cfg = config(&[("SHOP_STOCK_SLOTS", "9"), ("ITEM_STACK_LIMIT", "16")]);
        let stock = cfg.new_shop_stock();
        assert_eq!(stock.slot_count(), 9);
        assert_eq!(stock.stack_limit(), 16);
        assert!(stock.is_empty());
    }
}
