// SQLite implementation of the BalanceStore trait

use crate::core::ledger::{
    Account, AccountId, Amount, BalanceHistoryEntry, BalanceStore, Journal, LedgerError,
    ReasonCode, Shortfall,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

pub struct SqliteBalanceStore {
    pool: SqlitePool,
}

impl SqliteBalanceStore {
    /// Create a balance store on an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the accounts and history tables.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL,
                delta INTEGER NOT NULL,
                balance_before INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                reason TEXT NOT NULL,
                actor_id TEXT,
                counterparty_id TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_balance_history_account
            ON balance_history(account_id, id DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Make sure the row exists and take SQLite's write lock.
    ///
    /// SQLite has no `SELECT ... FOR UPDATE`; issuing a write as the first
    /// statement of the transaction reserves the database for this writer
    /// before any balance is read.
    async fn touch_account(
        tx: &mut Transaction<'static, Sqlite>,
        id: AccountId,
        name_if_new: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, balance)
            VALUES (?, ?, 0)
            ON CONFLICT(id) DO UPDATE SET updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(id.to_string())
        .bind(name_if_new)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn read_balance(
        tx: &mut Transaction<'static, Sqlite>,
        id: AccountId,
    ) -> Result<Amount, LedgerError> {
        sqlx::query_scalar::<_, i64>("SELECT balance FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&mut **tx)
            .await
            .map_err(storage)
    }

    async fn write_entry(
        tx: &mut Transaction<'static, Sqlite>,
        entry: &BalanceHistoryEntry,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(entry.balance_after)
        .bind(entry.account.to_string())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO balance_history
                (account_id, delta, balance_before, balance_after, reason, actor_id, counterparty_id, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.account.to_string())
        .bind(entry.delta)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(entry.reason.as_str())
        .bind(entry.actor.map(|id| id.to_string()))
        .bind(entry.counterparty.map(|id| id.to_string()))
        .bind(entry.timestamp.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(storage)?;

        Ok(())
    }

    fn account_from_row(row: &SqliteRow) -> Option<Account> {
        let id: String = row.get("id");
        Some(Account {
            id: id.parse().ok()?,
            name: row.get("name"),
            balance: row.get::<i64, _>("balance"),
        })
    }

    fn entry_from_row(row: &SqliteRow) -> Option<BalanceHistoryEntry> {
        let account: String = row.get("account_id");
        let reason: String = row.get("reason");
        let timestamp: String = row.get("timestamp");
        let actor: Option<String> = row.get("actor_id");
        let counterparty: Option<String> = row.get("counterparty_id");

        Some(BalanceHistoryEntry {
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .ok()?
                .with_timezone(&Utc),
            account: account.parse().ok()?,
            delta: row.get("delta"),
            balance_before: row.get("balance_before"),
            balance_after: row.get("balance_after"),
            reason: ReasonCode::parse(&reason)?,
            actor: actor.and_then(|s| s.parse().ok()),
            counterparty: counterparty.and_then(|s| s.parse().ok()),
        })
    }
}

#[async_trait]
impl BalanceStore for SqliteBalanceStore {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query("SELECT id, name, balance FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Ok(row.as_ref().and_then(Self::account_from_row))
    }

    async fn upsert_account(
        &self,
        id: AccountId,
        name: &str,
        starting_balance: Amount,
    ) -> Result<Account, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, balance)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(starting_balance)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_account(id)
            .await?
            .ok_or_else(|| LedgerError::Storage(format!("account {} vanished after upsert", id)))
    }

    async fn set_balance(
        &self,
        id: AccountId,
        amount: Amount,
        name_if_new: &str,
        actor: Option<AccountId>,
    ) -> Result<BalanceHistoryEntry, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        Self::touch_account(&mut tx, id, name_if_new).await?;
        let before = Self::read_balance(&mut tx, id).await?;

        let entry = BalanceHistoryEntry {
            timestamp: Utc::now(),
            account: id,
            delta: amount - before,
            balance_before: before,
            balance_after: amount,
            reason: ReasonCode::AdminSet,
            actor,
            counterparty: None,
        };
        Self::write_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(storage)?;

        Ok(entry)
    }

    async fn commit(&self, journal: &Journal) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        let mut postings: Vec<_> = journal.postings.iter().collect();
        postings.sort_by_key(|p| p.account);

        // Any early return drops `tx`, which rolls the transaction back.
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for posting in &postings {
            Self::touch_account(&mut tx, posting.account, &posting.account.to_string()).await?;
        }

        let now = Utc::now();
        let mut entries = Vec::with_capacity(postings.len());
        for posting in &postings {
            let before = Self::read_balance(&mut tx, posting.account).await?;
            let after = before
                .checked_add(posting.delta)
                .ok_or(LedgerError::Overflow {
                    account: posting.account,
                })?;
            let after = match (after < 0, journal.on_shortfall) {
                (false, _) => after,
                (true, Shortfall::ClampToZero) => 0,
                (true, Shortfall::Reject) => {
                    return Err(LedgerError::InsufficientFunds {
                        account: posting.account,
                        required: -posting.delta,
                        available: before,
                    })
                }
            };

            let entry = BalanceHistoryEntry {
                timestamp: now,
                account: posting.account,
                delta: after - before,
                balance_before: before,
                balance_after: after,
                reason: journal.reason,
                actor: journal.actor,
                counterparty: posting.counterparty,
            };
            Self::write_entry(&mut tx, &entry).await?;
            entries.push(entry);
        }

        tx.commit().await.map_err(storage)?;
        Ok(entries)
    }

    async fn history(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, delta, balance_before, balance_after, reason,
                   actor_id, counterparty_id, timestamp
            FROM balance_history
            WHERE account_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows.iter().filter_map(Self::entry_from_row).collect())
    }

    async fn top_balances(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, balance
            FROM accounts
            ORDER BY balance DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows.iter().filter_map(Self::account_from_row).collect())
    }
}
