// In-memory implementation of SaleLogStore.

use crate::core::shop::{SaleLogStore, SaleRecord};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemorySaleLog {
    records: RwLock<Vec<SaleRecord>>,
}

impl InMemorySaleLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SaleLogStore for InMemorySaleLog {
    async fn append(&self, record: SaleRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn page(&self, shop: &str, page: usize, page_size: usize) -> Result<Vec<SaleRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|record| record.shop == shop)
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn count(&self, shop: &str) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|record| record.shop == shop).count() as u64)
    }
}
