// Ledger module - durable per-account balances.

mod balance_ledger;
mod ledger_models;

pub use balance_ledger::{BalanceLedger, BalanceStore};
pub use ledger_models::{
    format_amount, parse_amount, Account, AccountId, Amount, BalanceHistoryEntry, BalanceUpdate,
    Journal, LedgerError, ParseAccountIdError, Posting, ReasonCode, Shortfall, MINOR_UNITS,
};
