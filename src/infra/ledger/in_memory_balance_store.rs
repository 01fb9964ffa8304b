// In-memory implementation of BalanceStore.
//
// Backs the unit tests and throwaway setups. All state sits behind one mutex
// so a journal is applied against a consistent snapshot and either lands
// completely or not at all, mirroring a database transaction.

use crate::core::ledger::{
    Account, AccountId, Amount, BalanceHistoryEntry, BalanceStore, Journal, LedgerError,
    ReasonCode, Shortfall,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    history: Vec<BalanceHistoryEntry>,
}

/// Cloning shares the underlying state, so a test can keep a handle while
/// the ledger owns another.
#[derive(Clone, Default)]
pub struct InMemoryBalanceStore {
    state: Arc<Mutex<State>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a storage error, as if the database were
    /// unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sum of every balance, for conservation checks.
    pub fn total_balance(&self) -> Amount {
        self.state
            .lock()
            .map(|state| state.accounts.values().map(|a| a.balance).sum())
            .unwrap_or(0)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage("store unavailable".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| LedgerError::Storage("in-memory store poisoned".to_string()))
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.state()?.accounts.get(&id).cloned())
    }

    async fn upsert_account(
        &self,
        id: AccountId,
        name: &str,
        starting_balance: Amount,
    ) -> Result<Account, LedgerError> {
        let mut state = self.state()?;
        let account = state.accounts.entry(id).or_insert_with(|| Account {
            id,
            name: name.to_string(),
            balance: starting_balance,
        });
        account.name = name.to_string();
        Ok(account.clone())
    }

    async fn set_balance(
        &self,
        id: AccountId,
        amount: Amount,
        name_if_new: &str,
        actor: Option<AccountId>,
    ) -> Result<BalanceHistoryEntry, LedgerError> {
        let mut state = self.state()?;
        let account = state.accounts.entry(id).or_insert_with(|| Account {
            id,
            name: name_if_new.to_string(),
            balance: 0,
        });
        let before = account.balance;
        account.balance = amount;

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
        state.history.push(entry.clone());
        Ok(entry)
    }

    async fn commit(&self, journal: &Journal) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        let mut state = self.state()?;

        let mut postings: Vec<_> = journal.postings.iter().collect();
        postings.sort_by_key(|p| p.account);

        // Work out every new balance before touching anything.
        let now = Utc::now();
        let mut entries = Vec::with_capacity(postings.len());
        for posting in postings {
            let before = state
                .accounts
                .get(&posting.account)
                .map(|a| a.balance)
                .unwrap_or(0);
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
            entries.push(BalanceHistoryEntry {
                timestamp: now,
                account: posting.account,
                delta: after - before,
                balance_before: before,
                balance_after: after,
                reason: journal.reason,
                actor: journal.actor,
                counterparty: posting.counterparty,
            });
        }

        for entry in &entries {
            let account = state
                .accounts
                .entry(entry.account)
                .or_insert_with(|| Account {
                    id: entry.account,
                    name: entry.account.to_string(),
                    balance: 0,
                });
            account.balance = entry.balance_after;
        }
        state.history.extend(entries.iter().cloned());
        Ok(entries)
    }

    async fn history(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
        let state = self.state()?;
        Ok(state
            .history
            .iter()
            .filter(|entry| entry.account == id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn top_balances(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
        let state = self.state()?;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));
        accounts.truncate(limit);
        Ok(accounts)
    }
}
