// Shop listing - the state behind one shop block.
//
// The template is one "lot": up to nine stacks the owner placed in the
// template slots. Stock is a bounded container. Every owner edit re-checks
// ownership here rather than trusting the caller.

use super::ShopError;
use crate::core::commission::TradeDirection;
use crate::core::items::{
    split_into_stacks, summarize, totals_by_kind, Inventory, ItemKind, ItemStack,
};
use crate::core::ledger::{AccountId, Amount};
use crate::core::world::{give_or_spill, GameWorld, Location};

pub const MAX_TEMPLATE_ENTRIES: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShopPrices {
    /// Per lot, paid by visitors buying stock (SELL mode).
    pub sell: Amount,
    /// Per lot, paid by the owner for visitors' items (BUY mode).
    pub buy: Amount,
}

#[derive(Debug, Clone)]
pub struct ShopListing {
    location: Location,
    owner: Option<AccountId>,
    template: Vec<ItemStack>,
    stock: Inventory,
    prices: ShopPrices,
    mode: TradeDirection,
}

impl ShopListing {
    /// A freshly placed shop: no template, no prices, selling.
    pub fn new(location: Location, owner: Option<AccountId>, stock: Inventory) -> Self {
        Self {
            location,
            owner,
            template: Vec::new(),
            stock,
            prices: ShopPrices::default(),
            mode: TradeDirection::Sell,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn owner(&self) -> Option<AccountId> {
        self.owner
    }

    pub fn template(&self) -> &[ItemStack] {
        &self.template
    }

    pub fn stock(&self) -> &Inventory {
        &self.stock
    }

    pub fn prices(&self) -> ShopPrices {
        self.prices
    }

    pub fn mode(&self) -> TradeDirection {
        self.mode
    }

    pub fn price_for(&self, direction: TradeDirection) -> Amount {
        match direction {
            TradeDirection::Sell => self.prices.sell,
            TradeDirection::Buy => self.prices.buy,
        }
    }

    /// Per-lot quantity for each kind in the template.
    pub fn requirements(&self) -> Vec<(ItemKind, u64)> {
        totals_by_kind(&self.template)
    }

    pub fn template_summary(&self) -> String {
        summarize(&self.template)
    }

    // ------------------------------------------------------------------------
    // Lot arithmetic
    // ------------------------------------------------------------------------

    /// Whole lots the stock can currently supply.
    pub fn available_lots(&self) -> u64 {
        self.requirements()
            .iter()
            .map(|(kind, per_lot)| self.stock.count(kind) / per_lot)
            .min()
            .unwrap_or(0)
    }

    /// Whole lots the stock can still absorb, accounting for kinds that
    /// compete for the same empty slots.
    pub fn available_lots_by_space(&self) -> u64 {
        let lot_size: u64 = self.requirements().iter().map(|(_, n)| n).sum();
        if lot_size == 0 {
            return 0;
        }

        let capacity = self.stock.slot_count() as u64 * u64::from(self.stock.stack_limit());
        let (mut lo, mut hi) = (0u64, capacity / lot_size);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.stock.can_fit_all(&self.lot_stacks(mid)) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// Whole lots a player carries in their inventory.
    pub fn lots_carried_by(&self, world: &dyn GameWorld, player: AccountId) -> u64 {
        self.requirements()
            .iter()
            .map(|(kind, per_lot)| world.count_items(player, kind) / per_lot)
            .min()
            .unwrap_or(0)
    }

    /// The stacks making up `lots` lots.
    pub fn lot_stacks(&self, lots: u64) -> Vec<ItemStack> {
        self.requirements()
            .iter()
            .flat_map(|(kind, per_lot)| {
                split_into_stacks(kind, per_lot.saturating_mul(lots), self.stock.stack_limit())
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Stock movement used by the transaction engine
    // ------------------------------------------------------------------------

    /// Pull `lots` lots out of stock. If any kind comes up short, everything
    /// taken so far goes back and `None` is returned.
    pub(crate) fn reserve_lots(&mut self, lots: u64) -> Option<Vec<ItemStack>> {
        let mut reserved = Vec::new();
        for (kind, per_lot) in self.requirements() {
            let needed = per_lot.saturating_mul(lots);
            let got = self.stock.extract(&kind, needed);
            reserved.extend(split_into_stacks(&kind, got, self.stock.stack_limit()));
            if got < needed {
                let leftovers = self.stock.insert_all(reserved);
                debug_assert!(leftovers.is_empty(), "returned items must fit where they came from");
                return None;
            }
        }
        Some(reserved)
    }

    /// Put stacks into stock, returning what did not fit.
    pub(crate) fn restock(&mut self, stacks: Vec<ItemStack>) -> Vec<ItemStack> {
        self.stock.insert_all(stacks)
    }

    /// Take the given stacks back out of stock, as far as they are still
    /// there. Returns what was actually removed.
    pub(crate) fn unstock(&mut self, stacks: &[ItemStack]) -> Vec<ItemStack> {
        totals_by_kind(stacks)
            .into_iter()
            .flat_map(|(kind, total)| {
                let got = self.stock.extract(&kind, total);
                split_into_stacks(&kind, got, self.stock.stack_limit())
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Owner operations
    // ------------------------------------------------------------------------

    fn authorize(&self, actor: AccountId, world: &dyn GameWorld) -> Result<(), ShopError> {
        if self.owner == Some(actor) || world.can_bypass_ownership(actor) {
            Ok(())
        } else {
            Err(ShopError::NotOwner)
        }
    }

    pub fn set_prices(
        &mut self,
        actor: AccountId,
        prices: ShopPrices,
        world: &dyn GameWorld,
    ) -> Result<(), ShopError> {
        self.authorize(actor, world)?;
        if prices.sell < 0 || prices.buy < 0 {
            return Err(ShopError::InvalidPrice);
        }
        self.prices = prices;
        Ok(())
    }

    pub fn set_mode(
        &mut self,
        actor: AccountId,
        mode: TradeDirection,
        world: &dyn GameWorld,
    ) -> Result<(), ShopError> {
        self.authorize(actor, world)?;
        self.mode = mode;
        Ok(())
    }

    /// Replace the template with stacks taken from the actor's inventory.
    /// The previous template goes back to the actor.
    pub fn set_template(
        &mut self,
        actor: AccountId,
        template: Vec<ItemStack>,
        world: &dyn GameWorld,
    ) -> Result<(), ShopError> {
        self.authorize(actor, world)?;
        if template.len() > MAX_TEMPLATE_ENTRIES || template.iter().any(ItemStack::is_empty) {
            return Err(ShopError::InvalidTemplate);
        }

        let needed = totals_by_kind(&template);
        if needed
            .iter()
            .any(|(kind, total)| world.count_items(actor, kind) < *total)
        {
            return Err(ShopError::TemplateItemsMissing);
        }

        let mut taken = Vec::new();
        for (kind, total) in &needed {
            let got = world.take_items(actor, kind, *total);
            taken.extend(split_into_stacks(kind, got, self.stock.stack_limit()));
            if got < *total {
                give_or_spill(world, actor, taken, &self.location);
                return Err(ShopError::ItemsChanged);
            }
        }

        let previous = std::mem::replace(&mut self.template, template);
        give_or_spill(world, actor, previous, &self.location);
        Ok(())
    }

    /// Move items from the actor's inventory into stock. Returns how many
    /// moved; limited by what the actor has and what the stock can hold.
    pub fn deposit_stock(
        &mut self,
        actor: AccountId,
        kind: &ItemKind,
        amount: u64,
        world: &dyn GameWorld,
    ) -> Result<u64, ShopError> {
        self.authorize(actor, world)?;
        let room = amount.min(self.stock.space_for(kind));
        let taken = world.take_items(actor, kind, room);
        let leftovers = self
            .stock
            .insert_all(split_into_stacks(kind, taken, self.stock.stack_limit()));
        if !leftovers.is_empty() {
            give_or_spill(world, actor, leftovers, &self.location);
        }
        Ok(taken)
    }

    /// Move items from stock to the actor. Returns how many moved.
    pub fn withdraw_stock(
        &mut self,
        actor: AccountId,
        kind: &ItemKind,
        amount: u64,
        world: &dyn GameWorld,
    ) -> Result<u64, ShopError> {
        self.authorize(actor, world)?;
        let got = self.stock.extract(kind, amount);
        give_or_spill(
            world,
            actor,
            split_into_stacks(kind, got, self.stock.stack_limit()),
            &self.location,
        );
        Ok(got)
    }

    /// The block was removed: drop stock and template where it stood.
    pub fn dismantle(&mut self, world: &dyn GameWorld) -> Vec<ItemStack> {
        let mut spilled = self.stock.drain();
        spilled.append(&mut self.template);
        self.owner = None;

        if !spilled.is_empty() {
            tracing::info!(
                shop = %self.location.block_key(),
                items = %summarize(&spilled),
                "Shop removed, dropping contents"
            );
            world.spill(&self.location, spilled.clone());
        }
        spilled
    }
}
