// Commission override storage implementations.

mod in_memory;
mod sqlite_commission_store;

pub use in_memory::InMemoryCommissionStore;
pub use sqlite_commission_store::SqliteCommissionStore;
