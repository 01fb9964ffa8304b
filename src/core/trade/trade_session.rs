// Trade session - the escrow state shared by two players.
//
// Each side stages items and money. Any change to either side clears both
// ready flags; settlement only happens once both sides confirm the same
// state.

use crate::core::items::{Inventory, ItemKind, ItemStack};
use crate::core::ledger::{AccountId, Amount};
use crate::core::world::Location;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Settled,
    Aborted,
}

/// Read-only snapshot for display.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeView {
    pub session: SessionId,
    pub participants: [AccountId; 2],
    pub offers: [Vec<ItemStack>; 2],
    pub money: [Amount; 2],
    pub ready: [bool; 2],
}

#[derive(Debug, Clone)]
pub struct TradeSession {
    id: SessionId,
    participants: [AccountId; 2],
    offers: [Inventory; 2],
    money: [Amount; 2],
    ready: [bool; 2],
    meeting_point: Location,
    state: SessionState,
}

impl TradeSession {
    pub fn new(
        id: SessionId,
        left: AccountId,
        right: AccountId,
        meeting_point: Location,
        offer: Inventory,
    ) -> Self {
        Self {
            id,
            participants: [left, right],
            offers: [offer.clone(), offer],
            money: [0, 0],
            ready: [false, false],
            meeting_point,
            state: SessionState::Active,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn participant(&self, side: Side) -> AccountId {
        self.participants[side.index()]
    }

    pub fn side_of(&self, account: AccountId) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.participant(*side) == account)
    }

    pub fn offer(&self, side: Side) -> &Inventory {
        &self.offers[side.index()]
    }

    pub fn money(&self, side: Side) -> Amount {
        self.money[side.index()]
    }

    pub fn is_ready(&self, side: Side) -> bool {
        self.ready[side.index()]
    }

    pub fn both_ready(&self) -> bool {
        self.ready.iter().all(|ready| *ready)
    }

    /// Where the session started; the drop point for returned items when a
    /// participant's own position is unknown.
    pub fn meeting_point(&self) -> &Location {
        &self.meeting_point
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Stage stacks on one side. Returns what did not fit.
    pub fn add_items(&mut self, side: Side, stacks: Vec<ItemStack>) -> Vec<ItemStack> {
        let offered: u64 = stacks.iter().map(|s| u64::from(s.count)).sum();
        let leftovers = self.offers[side.index()].insert_all(stacks);
        let rejected: u64 = leftovers.iter().map(|s| u64::from(s.count)).sum();
        if offered > rejected {
            self.reset_ready();
        }
        leftovers
    }

    /// Unstage up to `amount` of a kind. Returns how many were removed.
    pub fn remove_items(&mut self, side: Side, kind: &ItemKind, amount: u64) -> u64 {
        let removed = self.offers[side.index()].extract(kind, amount);
        if removed > 0 {
            self.reset_ready();
        }
        removed
    }

    pub fn set_money(&mut self, side: Side, amount: Amount) {
        if self.money[side.index()] != amount {
            self.money[side.index()] = amount;
            self.reset_ready();
        }
    }

    /// Flip one side's flag. Returns the new value.
    pub fn toggle_ready(&mut self, side: Side) -> bool {
        let flag = &mut self.ready[side.index()];
        *flag = !*flag;
        *flag
    }

    /// The single payment that settles both money offers:
    /// `(payer, payee, amount)`, or `None` when they cancel out.
    pub fn net_transfer(&self) -> Option<(AccountId, AccountId, Amount)> {
        let net = self.money(Side::Left) - self.money(Side::Right);
        let (left, right) = (self.participant(Side::Left), self.participant(Side::Right));
        match net {
            0 => None,
            n if n > 0 => Some((left, right, n)),
            n => Some((right, left, -n)),
        }
    }

    pub fn view(&self) -> TradeView {
        TradeView {
            session: self.id,
            participants: self.participants,
            offers: [self.offers[0].contents(), self.offers[1].contents()],
            money: self.money,
            ready: self.ready,
        }
    }

    /// Empty both offers, left first.
    pub(crate) fn drain_offers(&mut self) -> [Vec<ItemStack>; 2] {
        [self.offers[0].drain(), self.offers[1].drain()]
    }

    pub(crate) fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.ready = [false, false];
    }

    fn reset_ready(&mut self) {
        self.ready = [false, false];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT: AccountId = AccountId::from_u128(1);
    const RIGHT: AccountId = AccountId::from_u128(2);

    fn session() -> TradeSession {
        TradeSession::new(
            7,
            LEFT,
            RIGHT,
            Location::new("overworld", 0.0, 64.0, 0.0),
            Inventory::new(27),
        )
    }

    fn diamonds(count: u32) -> ItemStack {
        ItemStack::new(ItemKind::new("minecraft:diamond"), count)
    }

    #[test]
    fn any_change_clears_both_flags() {
        let mut s = session();
        s.toggle_ready(Side::Left);
        s.toggle_ready(Side::Right);
        assert!(s.both_ready());

        s.set_money(Side::Right, 5);
        assert!(!s.is_ready(Side::Left));
        assert!(!s.is_ready(Side::Right));

        s.toggle_ready(Side::Left);
        s.add_items(Side::Right, vec![diamonds(1)]);
        assert!(!s.is_ready(Side::Left));

        s.toggle_ready(Side::Left);
        let diamond = ItemKind::new("minecraft:diamond");
        assert_eq!(s.remove_items(Side::Right, &diamond, 5), 1);
        assert!(!s.is_ready(Side::Left));
    }

    #[test]
    fn no_op_edits_keep_confirmation() {
        let mut s = session();
        s.set_money(Side::Left, 10);
        s.toggle_ready(Side::Left);

        s.set_money(Side::Left, 10);
        assert_eq!(s.remove_items(Side::Right, &ItemKind::new("minecraft:dirt"), 1), 0);
        assert!(s.is_ready(Side::Left));
    }

    #[test]
    fn toggle_ready_flips() {
        let mut s = session();
        assert!(s.toggle_ready(Side::Right));
        assert!(!s.toggle_ready(Side::Right));
    }

    #[test]
    fn net_transfer_goes_from_the_larger_offer() {
        let mut s = session();
        assert_eq!(s.net_transfer(), None);

        s.set_money(Side::Left, 100);
        s.set_money(Side::Right, 30);
        assert_eq!(s.net_transfer(), Some((LEFT, RIGHT, 70)));

        s.set_money(Side::Left, 20);
        s.set_money(Side::Right, 50);
        assert_eq!(s.net_transfer(), Some((RIGHT, LEFT, 30)));

        s.set_money(Side::Left, 50);
        assert_eq!(s.net_transfer(), None);
    }

    #[test]
    fn view_reflects_both_sides() {
        let mut s = session();
        s.add_items(Side::Left, vec![diamonds(64)]);
        s.set_money(Side::Right, 3);
        s.toggle_ready(Side::Right);

        let view = s.view();
        assert_eq!(view.session, 7);
        assert_eq!(view.participants, [LEFT, RIGHT]);
        assert_eq!(view.offers[0], vec![diamonds(64)]);
        assert!(view.offers[1].is_empty());
        assert_eq!(view.money, [0, 3]);
        assert_eq!(view.ready, [false, true]);
    }

    #[test]
    fn side_lookup() {
        let s = session();
        assert_eq!(s.side_of(LEFT), Some(Side::Left));
        assert_eq!(s.side_of(RIGHT), Some(Side::Right));
        assert_eq!(s.side_of(AccountId::from_u128(3)), None);
        assert_eq!(Side::Left.other(), Side::Right);
    }
}
