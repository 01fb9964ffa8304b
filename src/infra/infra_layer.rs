// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "database.rs"]
pub mod database;

#[path = "ledger/mod.rs"]
pub mod ledger;

#[path = "commission/mod.rs"]
pub mod commission;

#[path = "shop/mod.rs"]
pub mod shop;
