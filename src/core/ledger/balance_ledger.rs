// Balance ledger - the only writer of record for account balances.
//
// Every mutation goes through `apply`, which takes the per-account locks in
// ascending id order, hands one journal to the store (one durable
// transaction), and only then updates the read cache and notifies
// subscribers. Callers must not assume a balance changed unless `Ok` came back.

use super::ledger_models::{
    Account, AccountId, Amount, BalanceHistoryEntry, BalanceUpdate, Journal, LedgerError,
    ReasonCode, Shortfall,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Durable account storage.
///
/// Implementations must make `commit` and `set_balance` all-or-nothing: on
/// any error no balance and no history row may have changed.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Fetch an account without creating it.
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError>;

    /// Create the account with `starting_balance` if it is missing, and
    /// record `name` as its display name either way.
    async fn upsert_account(
        &self,
        id: AccountId,
        name: &str,
        starting_balance: Amount,
    ) -> Result<Account, LedgerError>;

    /// Overwrite a balance unconditionally, creating the row if needed.
    async fn set_balance(
        &self,
        id: AccountId,
        amount: Amount,
        name_if_new: &str,
        actor: Option<AccountId>,
    ) -> Result<BalanceHistoryEntry, LedgerError>;

    /// Apply every posting of the journal in one transaction, locking rows
    /// in ascending account order. Missing accounts are created at zero.
    async fn commit(&self, journal: &Journal) -> Result<Vec<BalanceHistoryEntry>, LedgerError>;

    /// Most recent history entries for an account, newest first.
    async fn history(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError>;

    /// Richest accounts, highest balance first.
    async fn top_balances(&self, limit: usize) -> Result<Vec<Account>, LedgerError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub struct BalanceLedger<S: BalanceStore> {
    store: S,
    /// Read-through cache, written only after a successful commit or read.
    cache: DashMap<AccountId, Amount>,
    /// One async lock per account, taken in ascending id order.
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    updates: broadcast::Sender<BalanceUpdate>,
    starting_balance: Amount,
}

impl<S: BalanceStore> BalanceLedger<S> {
    pub fn new(store: S) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            cache: DashMap::new(),
            locks: DashMap::new(),
            updates,
            starting_balance: 0,
        }
    }

    /// Balance given to players the first time they are observed.
    pub fn with_starting_balance(mut self, starting_balance: Amount) -> Self {
        self.starting_balance = starting_balance.max(0);
        self
    }

    /// Live balance pushes for the presentation layer.
    pub fn subscribe(&self) -> broadcast::Receiver<BalanceUpdate> {
        self.updates.subscribe()
    }

    /// Register a player on join, creating the account lazily and refreshing
    /// the display name.
    pub async fn observe_player(&self, id: AccountId, name: &str) -> Result<Account, LedgerError> {
        let _guards = self.lock_accounts(&[id]).await;
        let account = self
            .store
            .upsert_account(id, name, self.starting_balance)
            .await?;
        self.cache.insert(id, account.balance);
        Ok(account)
    }

    /// Create a service account (e.g. the commission collector) at zero.
    pub async fn ensure_system_account(
        &self,
        id: AccountId,
        name: &str,
    ) -> Result<Account, LedgerError> {
        let _guards = self.lock_accounts(&[id]).await;
        let account = self.store.upsert_account(id, name, 0).await?;
        self.cache.insert(id, account.balance);
        Ok(account)
    }

    /// Current balance for display, served from the cache when possible.
    /// Unknown accounts read as zero and are not created. The cache only sees
    /// this process's writes; decisions go through `refresh_balance`.
    pub async fn get_balance(&self, id: AccountId) -> Result<Amount, LedgerError> {
        if let Some(balance) = self.cache.get(&id) {
            return Ok(*balance);
        }
        self.refresh_balance(id).await
    }

    /// Authoritative balance straight from the store. Used wherever a
    /// monetary decision is made.
    pub async fn refresh_balance(&self, id: AccountId) -> Result<Amount, LedgerError> {
        let balance = self
            .store
            .get_account(id)
            .await?
            .map(|account| account.balance)
            .unwrap_or(0);
        self.cache.insert(id, balance);
        Ok(balance)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        self.store.get_account(id).await
    }

    /// Administrative overwrite.
    pub async fn set_balance(
        &self,
        id: AccountId,
        amount: Amount,
        name_if_new: &str,
        actor: Option<AccountId>,
    ) -> Result<Amount, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let _guards = self.lock_accounts(&[id]).await;
        let entry = match self.store.set_balance(id, amount, name_if_new, actor).await {
            Ok(entry) => entry,
            Err(err) => {
                self.invalidate(&[id], &err);
                return Err(err);
            }
        };

        tracing::info!(account = %id, balance = entry.balance_after, "Balance set");
        self.publish(&[entry]);
        Ok(amount)
    }

    /// Credit an account. Returns the new balance.
    pub async fn add_balance(
        &self,
        id: AccountId,
        amount: Amount,
        actor: Option<AccountId>,
    ) -> Result<Amount, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let journal = Journal::new(ReasonCode::Deposit, Shortfall::Reject)
            .actor(actor)
            .post(id, amount, None)?;
        let entries = self.apply(journal).await?;
        Ok(Self::balance_after(&entries, id))
    }

    /// Debit an account, flooring at zero instead of failing when the
    /// balance is too small. Returns the new balance.
    pub async fn remove_balance(
        &self,
        id: AccountId,
        amount: Amount,
        actor: Option<AccountId>,
    ) -> Result<Amount, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let journal = Journal::new(ReasonCode::Withdrawal, Shortfall::ClampToZero)
            .actor(actor)
            .post(id, -amount, None)?;
        let entries = self.apply(journal).await?;
        Ok(Self::balance_after(&entries, id))
    }

    /// Move `amount` from one account to another as one unit.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        reason: ReasonCode,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        self.transfer_if(from, to, amount, reason, || true).await
    }

    /// `transfer`, but `proceed` is asked once both account locks are held,
    /// right before the store commits. A `false` abandons the transfer with
    /// `LedgerError::Withdrawn` and nothing moves.
    pub async fn transfer_if(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        reason: ReasonCode,
        proceed: impl Fn() -> bool + Send + Sync,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }

        let journal = Journal::new(reason, Shortfall::Reject)
            .actor(Some(from))
            .post(from, -amount, Some(to))?
            .post(to, amount, Some(from))?;
        self.apply_if(journal, proceed).await
    }

    /// Debit `from` once and credit two recipients. Nothing moves unless
    /// `from` covers the combined total.
    pub async fn split_transfer(
        &self,
        from: AccountId,
        to_a: AccountId,
        amount_a: Amount,
        to_b: AccountId,
        amount_b: Amount,
        reason: ReasonCode,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        if amount_a < 0 {
            return Err(LedgerError::InvalidAmount(amount_a));
        }
        if amount_b < 0 {
            return Err(LedgerError::InvalidAmount(amount_b));
        }
        let total = amount_a
            .checked_add(amount_b)
            .ok_or(LedgerError::Overflow { account: from })?;

        if to_a == to_b {
            return self.transfer(from, to_a, total, reason).await;
        }
        if total <= 0 {
            return Err(LedgerError::InvalidAmount(total));
        }

        // A recipient equal to `from` is merged into its debit by the journal.
        let journal = Journal::new(reason, Shortfall::Reject)
            .actor(Some(from))
            .post(from, -total, Some(to_a))?
            .post(to_a, amount_a, Some(from))?
            .post(to_b, amount_b, Some(from))?;
        self.apply(journal).await
    }

    pub async fn history(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        self.store.history(id, limit).await
    }

    pub async fn top_balances(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
        self.store.top_balances(limit).await
    }

    async fn apply(&self, journal: Journal) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        self.apply_if(journal, || true).await
    }

    /// Commit a journal under the account locks, then refresh the cache and
    /// notify subscribers.
    async fn apply_if(
        &self,
        journal: Journal,
        proceed: impl Fn() -> bool + Send + Sync,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        let accounts = journal.lock_order();
        if accounts.is_empty() {
            return Ok(Vec::new());
        }

        let _guards = self.lock_accounts(&accounts).await;
        if !proceed() {
            tracing::debug!(reason = journal.reason.as_str(), "Ledger journal withdrawn");
            return Err(LedgerError::Withdrawn);
        }
        let entries = match self.store.commit(&journal).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    reason = journal.reason.as_str(),
                    error = %err,
                    "Ledger journal rejected"
                );
                self.invalidate(&accounts, &err);
                return Err(err);
            }
        };

        for entry in &entries {
            tracing::debug!(
                account = %entry.account,
                delta = entry.delta,
                balance = entry.balance_after,
                reason = entry.reason.as_str(),
                "Balance changed"
            );
        }
        self.publish(&entries);
        Ok(entries)
    }

    async fn lock_accounts(&self, accounts: &[AccountId]) -> Vec<OwnedMutexGuard<()>> {
        let mut ordered = accounts.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            let lock = Arc::clone(
                self.locks
                    .entry(id)
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .value(),
            );
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn publish(&self, entries: &[BalanceHistoryEntry]) {
        for entry in entries {
            self.cache.insert(entry.account, entry.balance_after);
            // No subscribers is fine.
            let _ = self.updates.send(BalanceUpdate {
                account: entry.account,
                balance: entry.balance_after,
            });
        }
    }

    /// A failed write may leave us unsure what the store holds; drop the
    /// cached values so the next read goes to the store.
    fn invalidate(&self, accounts: &[AccountId], err: &LedgerError) {
        if matches!(err, LedgerError::Storage(_)) {
            for id in accounts {
                self.cache.remove(id);
            }
        }
    }

    fn balance_after(entries: &[BalanceHistoryEntry], id: AccountId) -> Amount {
        entries
            .iter()
            .rev()
            .find(|entry| entry.account == id)
            .map(|entry| entry.balance_after)
            .unwrap_or(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
