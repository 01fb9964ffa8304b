// SQLite implementation of SaleLogStore

use crate::core::commission::TradeDirection;
use crate::core::items::ItemStack;
use crate::core::shop::{SaleLogStore, SaleRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteSaleLog {
    pool: Pool<Sqlite>,
}

impl SqliteSaleLog {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shop_sales (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                shop TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                lots INTEGER NOT NULL,
                total INTEGER NOT NULL,
                fee INTEGER NOT NULL,
                summary TEXT NOT NULL,
                items TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shop_sales_shop ON shop_sales(shop, id DESC)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rows that no longer parse are skipped rather than failing the page.
    fn record_from_row(row: &SqliteRow) -> Option<SaleRecord> {
        let owner: String = row.get("owner_id");
        let customer: String = row.get("customer_id");
        let direction: String = row.get("direction");
        let items: String = row.get("items");
        let timestamp: String = row.get("timestamp");

        Some(SaleRecord {
            shop: row.get("shop"),
            owner: owner.parse().ok()?,
            customer: customer.parse().ok()?,
            direction: TradeDirection::parse(&direction)?,
            lots: u64::try_from(row.get::<i64, _>("lots")).ok()?,
            total: row.get("total"),
            fee: row.get("fee"),
            items: serde_json::from_str::<Vec<ItemStack>>(&items).ok()?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .ok()?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl SaleLogStore for SqliteSaleLog {
    async fn append(&self, record: SaleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shop_sales
                (shop, owner_id, customer_id, direction, lots, total, fee, summary, items, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.shop)
        .bind(record.owner.to_string())
        .bind(record.customer.to_string())
        .bind(record.direction.as_str())
        .bind(i64::try_from(record.lots)?)
        .bind(record.total)
        .bind(record.fee)
        .bind(record.summary())
        .bind(serde_json::to_string(&record.items)?)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn page(&self, shop: &str, page: usize, page_size: usize) -> Result<Vec<SaleRecord>> {
        let offset = page.saturating_mul(page_size);
        let rows = sqlx::query(
            r#"
            SELECT * FROM shop_sales
            WHERE shop = ?
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(shop)
        .bind(i64::try_from(page_size)?)
        .bind(i64::try_from(offset)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(Self::record_from_row).collect())
    }

    async fn count(&self, shop: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shop_sales WHERE shop = ?")
            .bind(shop)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
