// Trade module - two-player escrow trades.

mod trade_manager;
mod trade_session;

pub use trade_manager::{
    AbortReason, ReadyOutcome, TradeConfig, TradeError, TradeEvent, TradeManager,
};
pub use trade_session::{SessionId, SessionState, Side, TradeSession, TradeView};
