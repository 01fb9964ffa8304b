// Ledger storage implementations.

mod in_memory_balance_store;
mod sqlite_balance_store;

pub use in_memory_balance_store::InMemoryBalanceStore;
pub use sqlite_balance_store::SqliteBalanceStore;
