// Shop module - player shops selling or buying fixed lots of items.

mod sale_log;
mod shop_engine;
mod shop_listing;

pub use sale_log::{SaleLogStore, SaleRecord};
pub use shop_engine::{ShopError, ShopReceipt, ShopTransactionEngine};
pub use shop_listing::{ShopListing, ShopPrices, MAX_TEMPLATE_ENTRIES};
