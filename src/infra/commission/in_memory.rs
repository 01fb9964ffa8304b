// In-memory implementation of CommissionStore.

use crate::core::commission::{CommissionStore, FeeRates, StoredOverride};
use crate::core::ledger::AccountId;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Keeps raw rows keyed by the account text, like the database does.
#[derive(Default)]
pub struct InMemoryCommissionStore {
    rows: DashMap<String, StoredOverride>,
}

impl InMemoryCommissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row verbatim, bypassing validation.
    pub fn insert_raw(&self, row: StoredOverride) {
        self.rows.insert(row.account.clone(), row);
    }
}

#[async_trait]
impl CommissionStore for InMemoryCommissionStore {
    async fn load_overrides(&self) -> Result<Vec<StoredOverride>> {
        Ok(self.rows.iter().map(|row| row.value().clone()).collect())
    }

    async fn save_override(&self, account: AccountId, rates: FeeRates) -> Result<()> {
        self.insert_raw(StoredOverride {
            account: account.to_string(),
            sell_bps: i64::from(rates.sell_bps),
            buy_bps: i64::from(rates.buy_bps),
        });
        Ok(())
    }

    async fn delete_override(&self, account: AccountId) -> Result<()> {
        self.rows.remove(&account.to_string());
        Ok(())
    }
}
