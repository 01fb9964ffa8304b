// Ledger domain models - accounts, audit entries, journals and errors.
//
// Nothing in here touches storage. The balance ledger service and the store
// implementations in `infra/` share these types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Balances and prices are whole minor units (hundredths of a coin).
pub type Amount = i64;

/// Minor units per whole coin.
pub const MINOR_UNITS: Amount = 100;

/// Decimal places of an `Amount` written as coins.
const AMOUNT_SCALE: u32 = 2;

// ============================================================================
// ACCOUNT IDENTIFIERS
// ============================================================================

/// Player or service identifier.
///
/// Rendered and stored in the hyphenated 8-4-4-4-12 form players know from
/// the game, e.g. `069a79f4-44e9-4726-a5be-fca90e38aaf5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(Uuid);

impl AccountId {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid account id: {0}")]
pub struct ParseAccountIdError(String);

impl FromStr for AccountId {
    type Err = ParseAccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(AccountId)
            .map_err(|_| ParseAccountIdError(s.to_string()))
    }
}

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A player or system account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    /// Last observed display name (last write wins).
    pub name: String,
    pub balance: Amount,
}

/// Why a balance changed. Stored alongside every history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    AdminSet,
    Deposit,
    Withdrawal,
    Transfer,
    ShopPurchase,
    ShopSale,
    TradeSettlement,
}

impl ReasonCode {
    /// Convert the reason to its storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::AdminSet => "admin_set",
            ReasonCode::Deposit => "deposit",
            ReasonCode::Withdrawal => "withdrawal",
            ReasonCode::Transfer => "transfer",
            ReasonCode::ShopPurchase => "shop_purchase",
            ReasonCode::ShopSale => "shop_sale",
            ReasonCode::TradeSettlement => "trade_settlement",
        }
    }

    /// Parse a stored reason.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin_set" => Some(ReasonCode::AdminSet),
            "deposit" => Some(ReasonCode::Deposit),
            "withdrawal" => Some(ReasonCode::Withdrawal),
            "transfer" => Some(ReasonCode::Transfer),
            "shop_purchase" => Some(ReasonCode::ShopPurchase),
            "shop_sale" => Some(ReasonCode::ShopSale),
            "trade_settlement" => Some(ReasonCode::TradeSettlement),
            _ => None,
        }
    }
}

/// Immutable audit record appended by every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub account: AccountId,
    pub delta: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub reason: ReasonCode,
    pub actor: Option<AccountId>,
    pub counterparty: Option<AccountId>,
}

/// Pushed to subscribers after a mutation commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account: AccountId,
    pub balance: Amount,
}

// ============================================================================
// JOURNALS
// ============================================================================
// A journal is the unit of atomicity handed to a BalanceStore: every posting
// commits or none does.

/// What a store does when a posting would take an account below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    /// Fail the whole journal with `InsufficientFunds`.
    Reject,
    /// Floor the account at zero and record the smaller delta.
    ClampToZero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub account: AccountId,
    pub delta: Amount,
    pub counterparty: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    pub postings: Vec<Posting>,
    pub reason: ReasonCode,
    pub actor: Option<AccountId>,
    pub on_shortfall: Shortfall,
}

impl Journal {
    pub fn new(reason: ReasonCode, on_shortfall: Shortfall) -> Self {
        Self {
            postings: Vec::new(),
            reason,
            actor: None,
            on_shortfall,
        }
    }

    pub fn actor(mut self, actor: Option<AccountId>) -> Self {
        self.actor = actor;
        self
    }

    /// Add a posting. Zero deltas are dropped, and a second posting against
    /// the same account is merged into the first so stores only ever see
    /// one row per account.
    pub fn post(
        mut self,
        account: AccountId,
        delta: Amount,
        counterparty: Option<AccountId>,
    ) -> Result<Self, LedgerError> {
        if delta == 0 {
            return Ok(self);
        }
        if let Some(existing) = self.postings.iter_mut().find(|p| p.account == account) {
            existing.delta = existing
                .delta
                .checked_add(delta)
                .ok_or(LedgerError::Overflow { account })?;
        } else {
            self.postings.push(Posting {
                account,
                delta,
                counterparty,
            });
        }
        self.postings.retain(|p| p.delta != 0);
        Ok(self)
    }

    /// Accounts touched by this journal in lock order (ascending id).
    pub fn lock_order(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.postings.iter().map(|p| p.account).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Amount),

    #[error("Cannot transfer from an account to itself")]
    SelfTransfer,

    #[error("Insufficient funds in {account}: need {required}, have {available}")]
    InsufficientFunds {
        account: AccountId,
        required: Amount,
        available: Amount,
    },

    #[error("Balance overflow on {account}")]
    Overflow { account: AccountId },

    #[error("Transfer withdrawn before commit")]
    Withdrawn,

    #[error("Storage error: {0}")]
    Storage(String),
}

// ============================================================================
// DISPLAY HELPERS
// ============================================================================

/// Render minor units as `12.34`.
pub fn format_amount(amount: Amount) -> String {
    Decimal::new(amount, AMOUNT_SCALE).to_string()
}

/// Parse `12`, `12.3` or `12.34` into minor units. Negative input and more
/// than two significant decimals are rejected.
pub fn parse_amount(s: &str) -> Option<Amount> {
    let mut value = Decimal::from_str(s.trim()).ok()?.normalize();
    if value.is_sign_negative() || value.scale() > AMOUNT_SCALE {
        return None;
    }
    value.rescale(AMOUNT_SCALE);
    Amount::try_from(value.mantissa()).ok()
}
