// Sale log storage implementations.

mod in_memory_sale_log;
mod sqlite_sale_log;

pub use in_memory_sale_log::InMemorySaleLog;
pub use sqlite_sale_log::SqliteSaleLog;
