// Sale log - append-only record of completed shop transactions, paged per
// shop for the owner's history view.

use crate::core::commission::TradeDirection;
use crate::core::items::{summarize, ItemStack};
use crate::core::ledger::{AccountId, Amount};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    /// Block key of the shop, see `Location::block_key`.
    pub shop: String,
    pub owner: AccountId,
    pub customer: AccountId,
    pub direction: TradeDirection,
    pub lots: u64,
    pub total: Amount,
    pub fee: Amount,
    /// Everything that changed hands.
    pub items: Vec<ItemStack>,
    pub timestamp: DateTime<Utc>,
}

impl SaleRecord {
    pub fn summary(&self) -> String {
        summarize(&self.items)
    }
}

#[async_trait]
pub trait SaleLogStore: Send + Sync {
    async fn append(&self, record: SaleRecord) -> Result<()>;

    /// Newest first. `page` starts at 0.
    async fn page(&self, shop: &str, page: usize, page_size: usize) -> Result<Vec<SaleRecord>>;

    async fn count(&self, shop: &str) -> Result<u64>;
}
