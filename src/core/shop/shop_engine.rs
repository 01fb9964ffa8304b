// Shop transaction engine - buying from and selling to player shops.
//
// A shop is held behind a tokio Mutex for the whole transaction, so two
// visitors never reserve the same stock. Money moves in one ledger journal
// (customer or owner pays, the other side and the platform are credited).
// Items are staged first and put back if the journal fails.

use super::sale_log::{SaleLogStore, SaleRecord};
use super::shop_listing::{ShopListing, ShopPrices};
use crate::core::commission::{CommissionManager, TradeDirection};
use crate::core::items::{split_into_stacks, summarize, ItemKind, ItemStack};
use crate::core::ledger::{
    AccountId, Amount, BalanceLedger, BalanceStore, LedgerError, ReasonCode,
};
use crate::core::world::{give_or_spill, GameWorld, Location};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ShopError {
    #[error("This shop does not {0} right now")]
    WrongMode(TradeDirection),

    #[error("Lot count must be at least 1")]
    InvalidLots,

    #[error("This shop has no template yet")]
    EmptyTemplate,

    #[error("This shop has no owner")]
    NoOwner,

    #[error("You cannot trade with your own shop")]
    SelfTrade,

    #[error("You do not own this shop")]
    NotOwner,

    #[error("Prices cannot be negative")]
    InvalidPrice,

    #[error("A template holds at most 9 non-empty stacks")]
    InvalidTemplate,

    #[error("You do not have the items for this template")]
    TemplateItemsMissing,

    #[error("Only {available} lot(s) in stock, {requested} requested")]
    InsufficientStock { requested: u64, available: u64 },

    #[error("Room for only {available} more lot(s), {requested} offered")]
    InsufficientSpace { requested: u64, available: u64 },

    #[error("You carry only {available} lot(s), {requested} offered")]
    InsufficientItems { requested: u64, available: u64 },

    #[error("The owner can only pay for {available} lot(s), {requested} offered")]
    OwnerCannotAfford { requested: u64, available: u64 },

    #[error("Not enough money: need {required}, have {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Price for {lots} lot(s) is too large")]
    PriceOverflow { lots: u64 },

    #[error("Shop stock changed during the transaction")]
    StockChanged,

    #[error("Your inventory changed during the transaction")]
    ItemsChanged,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// DOMAIN MODELS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ShopReceipt {
    pub direction: TradeDirection,
    pub lots: u64,
    pub total: Amount,
    pub fee: Amount,
    /// Items that changed hands.
    pub items: Vec<ItemStack>,
}

impl ShopReceipt {
    /// What the receiving side got after commission.
    pub fn net(&self) -> Amount {
        self.total - self.fee
    }
}

/// Who pays whom for one transaction.
#[derive(Debug, Clone, Copy)]
struct Deal {
    direction: TradeDirection,
    owner: AccountId,
    customer: AccountId,
    lots: u64,
    total: Amount,
    fee: Amount,
}

impl Deal {
    fn payer(&self) -> AccountId {
        match self.direction {
            TradeDirection::Sell => self.customer,
            TradeDirection::Buy => self.owner,
        }
    }

    fn payee(&self) -> AccountId {
        match self.direction {
            TradeDirection::Sell => self.owner,
            TradeDirection::Buy => self.customer,
        }
    }

    fn reason(&self) -> ReasonCode {
        match self.direction {
            TradeDirection::Sell => ReasonCode::ShopPurchase,
            TradeDirection::Buy => ReasonCode::ShopSale,
        }
    }

    fn receipt(&self, items: Vec<ItemStack>) -> ShopReceipt {
        ShopReceipt {
            direction: self.direction,
            lots: self.lots,
            total: self.total,
            fee: self.fee,
            items,
        }
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ShopTransactionEngine<B: BalanceStore, L: SaleLogStore> {
    ledger: Arc<BalanceLedger<B>>,
    commission: Arc<CommissionManager>,
    sales: Arc<L>,
    world: Arc<dyn GameWorld>,
    platform_account: AccountId,
}

impl<B: BalanceStore, L: SaleLogStore + 'static> ShopTransactionEngine<B, L> {
    pub fn new(
        ledger: Arc<BalanceLedger<B>>,
        commission: Arc<CommissionManager>,
        sales: Arc<L>,
        world: Arc<dyn GameWorld>,
        platform_account: AccountId,
    ) -> Self {
        Self {
            ledger,
            commission,
            sales,
            world,
            platform_account,
        }
    }

    /// A visitor buys `lots` lots from a shop in SELL mode.
    pub async fn buy(
        &self,
        shop: &Mutex<ShopListing>,
        buyer: AccountId,
        lots: u64,
    ) -> Result<ShopReceipt, ShopError> {
        let mut listing = shop.lock().await;
        let owner = Self::check_preconditions(&listing, TradeDirection::Sell, buyer, lots)?;

        let available = listing.available_lots();
        if lots > available {
            return Err(ShopError::InsufficientStock {
                requested: lots,
                available,
            });
        }

        let deal = self.quote(&listing, TradeDirection::Sell, owner, buyer, lots)?;
        let balance = self.ledger.refresh_balance(buyer).await?;
        if balance < deal.total {
            return Err(ShopError::InsufficientFunds {
                required: deal.total,
                available: balance,
            });
        }

        let reserved = listing.reserve_lots(lots).ok_or(ShopError::StockChanged)?;

        if let Err(err) = self.settle(&deal).await {
            let leftovers = listing.restock(reserved);
            self.spill_at_shop(&listing, leftovers);
            tracing::warn!(
                shop = %listing.location().block_key(),
                buyer = %buyer,
                error = %err,
                "Shop purchase failed, stock restored"
            );
            return Err(err.into());
        }

        give_or_spill(self.world.as_ref(), buyer, reserved.clone(), listing.location());
        self.record_sale(&listing, &deal, reserved.clone());

        tracing::info!(
            shop = %listing.location().block_key(),
            buyer = %buyer,
            owner = %owner,
            lots,
            total = deal.total,
            fee = deal.fee,
            "Shop purchase completed"
        );
        Ok(deal.receipt(reserved))
    }

    /// A visitor sells `lots` lots to a shop in BUY mode.
    pub async fn sell(
        &self,
        shop: &Mutex<ShopListing>,
        seller: AccountId,
        lots: u64,
    ) -> Result<ShopReceipt, ShopError> {
        let mut listing = shop.lock().await;
        let owner = Self::check_preconditions(&listing, TradeDirection::Buy, seller, lots)?;

        let carried = listing.lots_carried_by(self.world.as_ref(), seller);
        if lots > carried {
            return Err(ShopError::InsufficientItems {
                requested: lots,
                available: carried,
            });
        }

        let space = listing.available_lots_by_space();
        if lots > space {
            return Err(ShopError::InsufficientSpace {
                requested: lots,
                available: space,
            });
        }

        let deal = self.quote(&listing, TradeDirection::Buy, owner, seller, lots)?;
        let owner_balance = self.ledger.refresh_balance(owner).await?;
        if owner_balance < deal.total {
            let price = listing.price_for(TradeDirection::Buy);
            return Err(ShopError::OwnerCannotAfford {
                requested: lots,
                available: (owner_balance.max(0) / price.max(1)) as u64,
            });
        }

        let taken = self.take_lots(&listing, seller, lots)?;
        let leftovers = listing.restock(taken.clone());
        self.spill_at_shop(&listing, leftovers);

        if let Err(err) = self.settle(&deal).await {
            let returned = listing.unstock(&taken);
            give_or_spill(self.world.as_ref(), seller, returned, listing.location());
            tracing::warn!(
                shop = %listing.location().block_key(),
                seller = %seller,
                error = %err,
                "Shop sale failed, items returned"
            );
            return Err(err.into());
        }

        self.record_sale(&listing, &deal, taken.clone());

        tracing::info!(
            shop = %listing.location().block_key(),
            seller = %seller,
            owner = %owner,
            lots,
            total = deal.total,
            fee = deal.fee,
            "Shop sale completed"
        );
        Ok(deal.receipt(taken))
    }

    pub async fn set_prices(
        &self,
        shop: &Mutex<ShopListing>,
        actor: AccountId,
        prices: ShopPrices,
    ) -> Result<(), ShopError> {
        shop.lock()
            .await
            .set_prices(actor, prices, self.world.as_ref())
    }

    pub async fn set_mode(
        &self,
        shop: &Mutex<ShopListing>,
        actor: AccountId,
        mode: TradeDirection,
    ) -> Result<(), ShopError> {
        shop.lock().await.set_mode(actor, mode, self.world.as_ref())
    }

    pub async fn set_template(
        &self,
        shop: &Mutex<ShopListing>,
        actor: AccountId,
        template: Vec<ItemStack>,
    ) -> Result<(), ShopError> {
        shop.lock()
            .await
            .set_template(actor, template, self.world.as_ref())
    }

    pub async fn deposit_stock(
        &self,
        shop: &Mutex<ShopListing>,
        actor: AccountId,
        kind: &ItemKind,
        amount: u64,
    ) -> Result<u64, ShopError> {
        shop.lock()
            .await
            .deposit_stock(actor, kind, amount, self.world.as_ref())
    }

    pub async fn withdraw_stock(
        &self,
        shop: &Mutex<ShopListing>,
        actor: AccountId,
        kind: &ItemKind,
        amount: u64,
    ) -> Result<u64, ShopError> {
        shop.lock()
            .await
            .withdraw_stock(actor, kind, amount, self.world.as_ref())
    }

    pub async fn dismantle(&self, shop: &Mutex<ShopListing>) -> Vec<ItemStack> {
        shop.lock().await.dismantle(self.world.as_ref())
    }

    /// Past transactions of the shop at `location`, newest first.
    pub async fn sale_history(
        &self,
        location: &Location,
        page: usize,
        page_size: usize,
    ) -> anyhow::Result<Vec<SaleRecord>> {
        self.sales
            .page(&location.block_key(), page, page_size)
            .await
    }

    pub async fn sale_count(&self, location: &Location) -> anyhow::Result<u64> {
        self.sales.count(&location.block_key()).await
    }

    // ------------------------------------------------------------------------

    fn check_preconditions(
        listing: &ShopListing,
        direction: TradeDirection,
        visitor: AccountId,
        lots: u64,
    ) -> Result<AccountId, ShopError> {
        if listing.mode() != direction {
            return Err(ShopError::WrongMode(direction));
        }
        if lots == 0 {
            return Err(ShopError::InvalidLots);
        }
        if listing.template().is_empty() {
            return Err(ShopError::EmptyTemplate);
        }
        let owner = listing.owner().ok_or(ShopError::NoOwner)?;
        if owner == visitor {
            return Err(ShopError::SelfTrade);
        }
        Ok(owner)
    }

    fn quote(
        &self,
        listing: &ShopListing,
        direction: TradeDirection,
        owner: AccountId,
        customer: AccountId,
        lots: u64,
    ) -> Result<Deal, ShopError> {
        let total = i64::try_from(lots)
            .ok()
            .and_then(|lots| listing.price_for(direction).checked_mul(lots))
            .ok_or(ShopError::PriceOverflow { lots })?;
        let fee = self.commission.fee_for(owner, direction, total);

        Ok(Deal {
            direction,
            owner,
            customer,
            lots,
            total,
            fee,
        })
    }

    /// One journal: payer debited the total, payee credited the net, platform
    /// credited the fee.
    async fn settle(&self, deal: &Deal) -> Result<(), LedgerError> {
        if deal.total == 0 {
            return Ok(());
        }
        self.ledger
            .split_transfer(
                deal.payer(),
                deal.payee(),
                deal.total - deal.fee,
                self.platform_account,
                deal.fee,
                deal.reason(),
            )
            .await?;
        Ok(())
    }

    /// Take `lots` lots from the seller. On a short read everything taken so
    /// far goes back to them.
    fn take_lots(
        &self,
        listing: &ShopListing,
        seller: AccountId,
        lots: u64,
    ) -> Result<Vec<ItemStack>, ShopError> {
        let mut taken = Vec::new();
        for (kind, per_lot) in listing.requirements() {
            let needed = per_lot.saturating_mul(lots);
            let got = self.world.take_items(seller, &kind, needed);
            taken.extend(split_into_stacks(&kind, got, listing.stock().stack_limit()));
            if got < needed {
                give_or_spill(self.world.as_ref(), seller, taken, listing.location());
                return Err(ShopError::ItemsChanged);
            }
        }
        Ok(taken)
    }

    fn spill_at_shop(&self, listing: &ShopListing, leftovers: Vec<ItemStack>) {
        if leftovers.is_empty() {
            return;
        }
        tracing::warn!(
            shop = %listing.location().block_key(),
            items = %summarize(&leftovers),
            "Shop stock overflowed, dropping items"
        );
        self.world.spill(listing.location(), leftovers);
    }

    /// Fire-and-forget: a failed log write never undoes a completed sale.
    fn record_sale(&self, listing: &ShopListing, deal: &Deal, items: Vec<ItemStack>) {
        let record = SaleRecord {
            shop: listing.location().block_key(),
            owner: deal.owner,
            customer: deal.customer,
            direction: deal.direction,
            lots: deal.lots,
            total: deal.total,
            fee: deal.fee,
            items,
            timestamp: Utc::now(),
        };

        let sales = Arc::clone(&self.sales);
        tokio::spawn(async move {
            if let Err(e) = sales.append(record).await {
                tracing::warn!(error = %e, "Failed to record shop sale");
            }
        });
    }
}

// ============================================================================
// TESTS
// ============================================================================
