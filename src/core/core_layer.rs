// The core module contains all business logic.
// Each feature gets its own submodule; storage is reached only through the
// traits declared here.

#[path = "items/mod.rs"]
pub mod items;

#[path = "world/mod.rs"]
pub mod world;

#[path = "ledger/mod.rs"]
pub mod ledger;

#[path = "commission/mod.rs"]
pub mod commission;

#[path = "shop/mod.rs"]
pub mod shop;

#[path = "trade/mod.rs"]
pub mod trade;
