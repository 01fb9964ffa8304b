// Commission module - platform fee rates for shop transactions.

mod commission_service;

pub use commission_service::{
    compute_fee, parse_override_list, CommissionManager, CommissionStore, FeeRates,
    StoredOverride, TradeDirection, MAX_BPS,
};
