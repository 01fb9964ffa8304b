// Commission manager - resolves the platform fee for a shop transaction.
//
// Rates are basis points (1/100 of a percent). Each account may carry its own
// sell and buy rates; everyone else pays the global defaults.

use crate::core::ledger::{AccountId, Amount};
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

pub const MAX_BPS: u32 = 10_000;

/// Which side of a shop a transaction runs on.
///
/// `Sell`: the owner sells stock to a visitor. `Buy`: the owner buys items
/// from a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeDirection {
    Sell,
    Buy,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Sell => "sell",
            TradeDirection::Buy => "buy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sell" => Some(TradeDirection::Sell),
            "buy" => Some(TradeDirection::Buy),
            _ => None,
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pair of rates, one per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeRates {
    pub sell_bps: u32,
    pub buy_bps: u32,
}

impl FeeRates {
    pub fn new(sell_bps: u32, buy_bps: u32) -> Self {
        Self { sell_bps, buy_bps }
    }

    pub fn for_direction(&self, direction: TradeDirection) -> u32 {
        match direction {
            TradeDirection::Sell => self.sell_bps,
            TradeDirection::Buy => self.buy_bps,
        }
    }

    fn is_valid(&self) -> bool {
        self.sell_bps <= MAX_BPS && self.buy_bps <= MAX_BPS
    }
}

/// An override as it sits in storage, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOverride {
    pub account: String,
    pub sell_bps: i64,
    pub buy_bps: i64,
}

impl StoredOverride {
    /// `None` for entries with an unreadable id or an out-of-range rate.
    fn parse(&self) -> Option<(AccountId, FeeRates)> {
        let account = self.account.parse().ok()?;
        let sell_bps = u32::try_from(self.sell_bps).ok()?;
        let buy_bps = u32::try_from(self.buy_bps).ok()?;
        let rates = FeeRates::new(sell_bps, buy_bps);
        rates.is_valid().then_some((account, rates))
    }
}

#[async_trait]
pub trait CommissionStore: Send + Sync {
    async fn load_overrides(&self) -> Result<Vec<StoredOverride>>;
    async fn save_override(&self, account: AccountId, rates: FeeRates) -> Result<()>;
    async fn delete_override(&self, account: AccountId) -> Result<()>;
}

/// Parse `uuid:sell:buy;uuid:sell:buy` override lists from configuration.
/// Malformed entries are skipped.
pub fn parse_override_list(raw: &str) -> Vec<(AccountId, FeeRates)> {
    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.trim().split(':');
            let stored = StoredOverride {
                account: parts.next()?.to_string(),
                sell_bps: parts.next()?.trim().parse().ok()?,
                buy_bps: parts.next()?.trim().parse().ok()?,
            };
            if parts.next().is_some() {
                return None;
            }
            stored.parse()
        })
        .collect()
}

/// `round(total * bps / 10000)` to the nearest minor unit, clamped to
/// `[0, total]`.
pub fn compute_fee(total: Amount, bps: u32) -> Amount {
    if total <= 0 || bps == 0 {
        return 0;
    }
    let raw = (i128::from(total) * i128::from(bps) + 5_000) / 10_000;
    raw.clamp(0, i128::from(total)) as Amount
}

pub struct CommissionManager {
    defaults: FeeRates,
    overrides: DashMap<AccountId, FeeRates>,
    store: Option<Arc<dyn CommissionStore>>,
}

impl CommissionManager {
    /// A manager backed only by configuration.
    pub fn new(defaults: FeeRates) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
            store: None,
        }
    }

    /// A manager that loads overrides from `store` and writes changes back.
    pub async fn with_store(defaults: FeeRates, store: Arc<dyn CommissionStore>) -> Result<Self> {
        let manager = Self {
            defaults,
            overrides: DashMap::new(),
            store: Some(Arc::clone(&store)),
        };

        let stored = store.load_overrides().await?;
        let total = stored.len();
        for entry in stored {
            match entry.parse() {
                Some((account, rates)) => {
                    manager.overrides.insert(account, rates);
                }
                None => tracing::debug!(account = %entry.account, "Skipping malformed fee override"),
            }
        }
        tracing::info!(
            loaded = manager.overrides.len(),
            skipped = total - manager.overrides.len(),
            "Commission overrides loaded"
        );
        Ok(manager)
    }

    pub fn defaults(&self) -> FeeRates {
        self.defaults
    }

    /// Rate for an account: its override if present, else the default.
    pub fn fee_bps(&self, account: AccountId, direction: TradeDirection) -> u32 {
        self.overrides
            .get(&account)
            .map(|rates| rates.for_direction(direction))
            .unwrap_or_else(|| self.defaults.for_direction(direction))
    }

    /// Fee owed on `total` for a shop owned by `account`.
    pub fn fee_for(&self, account: AccountId, direction: TradeDirection, total: Amount) -> Amount {
        compute_fee(total, self.fee_bps(account, direction))
    }

    pub fn override_for(&self, account: AccountId) -> Option<FeeRates> {
        self.overrides.get(&account).map(|rates| *rates)
    }

    pub async fn set_override(&self, account: AccountId, rates: FeeRates) -> Result<()> {
        if !rates.is_valid() {
            bail!(
                "Fee rates must be between 0 and {} bps, got sell={} buy={}",
                MAX_BPS,
                rates.sell_bps,
                rates.buy_bps
            );
        }
        if let Some(store) = &self.store {
            store.save_override(account, rates).await?;
        }
        self.overrides.insert(account, rates);
        tracing::info!(
            account = %account,
            sell_bps = rates.sell_bps,
            buy_bps = rates.buy_bps,
            "Fee override set"
        );
        Ok(())
    }

    /// Remove the account's override entirely. Returns whether one existed.
    pub async fn clear_override(&self, account: AccountId) -> Result<bool> {
        if let Some(store) = &self.store {
            store.delete_override(account).await?;
        }
        let existed = self.overrides.remove(&account).is_some();
        if existed {
            tracing::info!(account = %account, "Fee override cleared");
        }
        Ok(existed)
    }
}
