// SQLite implementation of CommissionStore

use crate::core::commission::{CommissionStore, FeeRates, StoredOverride};
use crate::core::ledger::AccountId;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteCommissionStore {
    pool: Pool<Sqlite>,
}

impl SqliteCommissionStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        // No CHECK constraints: out-of-range rows are tolerated and skipped
        // when the manager loads them.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commission_overrides (
                account_id TEXT PRIMARY KEY,
                sell_bps INTEGER NOT NULL,
                buy_bps INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CommissionStore for SqliteCommissionStore {
    async fn load_overrides(&self) -> Result<Vec<StoredOverride>> {
        let rows = sqlx::query("SELECT account_id, sell_bps, buy_bps FROM commission_overrides")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| StoredOverride {
                account: row.get("account_id"),
                sell_bps: row.get("sell_bps"),
                buy_bps: row.get("buy_bps"),
            })
            .collect())
    }

    async fn save_override(&self, account: AccountId, rates: FeeRates) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO commission_overrides (account_id, sell_bps, buy_bps)
            VALUES (?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                sell_bps = excluded.sell_bps,
                buy_bps = excluded.buy_bps
            "#,
        )
        .bind(account.to_string())
        .bind(i64::from(rates.sell_bps))
        .bind(i64::from(rates.buy_bps))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_override(&self, account: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM commission_overrides WHERE account_id = ?")
            .bind(account.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
