// Trade manager - requests, pairing and settlement of escrow trades.
//
// Requests are keyed by target and expire lazily. Accepted requests become
// sessions; each session sits behind its own tokio Mutex. Settlement runs
// under that lock, and moves money in one ledger transfer before any item
// changes hands. A cancel recorded before the store commits that transfer
// wins.

use super::trade_session::{SessionId, SessionState, Side, TradeSession, TradeView};
use crate::core::items::{split_into_stacks, Inventory, ItemKind, DEFAULT_STACK_LIMIT};
use crate::core::ledger::{AccountId, Amount, BalanceLedger, BalanceStore, LedgerError, ReasonCode};
use crate::core::world::{give_or_spill, GameWorld, Location};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct TradeConfig {
    pub request_ttl: Duration,
    pub max_distance: f64,
    pub offer_slots: usize,
    pub stack_limit: u32,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(60),
            max_distance: 16.0,
            offer_slots: 27,
            stack_limit: DEFAULT_STACK_LIMIT,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Why a session ended without settling.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    Cancelled(AccountId),
    Disconnected(AccountId),
    TooFarApart,
    InventoryFull(AccountId),
    InsufficientFunds(AccountId),
    Storage(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled(by) => write!(f, "Trade cancelled by {}", by),
            AbortReason::Disconnected(who) => write!(f, "{} is no longer online", who),
            AbortReason::TooFarApart => write!(f, "Players moved too far apart"),
            AbortReason::InventoryFull(who) => {
                write!(f, "{} does not have room for the offered items", who)
            }
            AbortReason::InsufficientFunds(who) => {
                write!(f, "{} cannot cover the offered money", who)
            }
            AbortReason::Storage(e) => write!(f, "Ledger unavailable: {}", e),
        }
    }
}

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("You cannot trade with yourself")]
    SelfRequest,

    #[error("{0} is already trading")]
    AlreadyTrading(AccountId),

    #[error("{0} is not online")]
    PlayerOffline(AccountId),

    #[error("No pending trade request")]
    NoPendingRequest,

    #[error("Players must be in the same world and close to each other")]
    NotCoLocated,

    #[error("You are not in a trade")]
    NotInSession,

    #[error("Amount cannot be negative, got {0}")]
    InvalidAmount(Amount),

    #[error("Not enough money: need {required}, have {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Trade aborted: {0}")]
    Aborted(AbortReason),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// EVENTS
// ============================================================================

/// Pushed to the presentation layer. Never used for decisions.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    RequestSent {
        from: AccountId,
        to: AccountId,
    },
    Started {
        session: SessionId,
        left: AccountId,
        right: AccountId,
    },
    Updated(TradeView),
    Settled {
        session: SessionId,
        left: AccountId,
        right: AccountId,
    },
    Aborted {
        session: SessionId,
        left: AccountId,
        right: AccountId,
        reason: AbortReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Waiting on the other side; carries the caller's new flag.
    Waiting { ready: bool },
    Settled(SessionId),
}

// ============================================================================
// CORE SERVICE
// ============================================================================

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct PendingRequest {
    from: AccountId,
    created_at: Instant,
}

struct SessionSlot {
    session: Mutex<TradeSession>,
    /// Set by cancel before it waits for the session lock. Settlement checks
    /// it again under the ledger's account locks, right before the store
    /// commits the money.
    abort_requested: OnceLock<AbortReason>,
}

pub struct TradeManager<S: BalanceStore> {
    ledger: Arc<BalanceLedger<S>>,
    world: Arc<dyn GameWorld>,
    config: TradeConfig,
    /// Keyed by target: one outstanding request each.
    pending: DashMap<AccountId, PendingRequest>,
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    bindings: DashMap<AccountId, SessionId>,
    /// Serialises session creation so a player cannot be paired twice.
    pairing: Mutex<()>,
    next_id: AtomicU64,
    events: broadcast::Sender<TradeEvent>,
}

impl<S: BalanceStore> TradeManager<S> {
    pub fn new(ledger: Arc<BalanceLedger<S>>, world: Arc<dyn GameWorld>, config: TradeConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ledger,
            world,
            config,
            pending: DashMap::new(),
            sessions: DashMap::new(),
            bindings: DashMap::new(),
            pairing: Mutex::new(()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Ask `to` for a trade. Replaces any request already waiting on `to`.
    pub fn send_request(&self, from: AccountId, to: AccountId) -> Result<(), TradeError> {
        if from == to {
            return Err(TradeError::SelfRequest);
        }
        for player in [from, to] {
            if self.bindings.contains_key(&player) {
                return Err(TradeError::AlreadyTrading(player));
            }
        }
        if !self.world.is_online(to) {
            return Err(TradeError::PlayerOffline(to));
        }

        self.sweep_expired(to);
        self.pending.insert(
            to,
            PendingRequest {
                from,
                created_at: Instant::now(),
            },
        );

        tracing::debug!(from = %from, to = %to, "Trade request sent");
        self.emit(TradeEvent::RequestSent { from, to });
        Ok(())
    }

    /// Who is waiting on `target`, if the request has not expired.
    pub fn pending_request_for(&self, target: AccountId) -> Option<AccountId> {
        self.sweep_expired(target);
        self.pending.get(&target).map(|request| request.from)
    }

    /// Drop the request from `from` to `to`. Returns whether one existed.
    pub fn deny_request(&self, to: AccountId, from: AccountId) -> bool {
        self.sweep_expired(to);
        self.pending
            .remove_if(&to, |_, request| request.from == from)
            .is_some()
    }

    /// `to` accepts the request from `from` and a session opens, with the
    /// requester on the left.
    pub async fn accept_request(&self, to: AccountId, from: AccountId) -> Result<SessionId, TradeError> {
        let _pairing = self.pairing.lock().await;

        self.sweep_expired(to);
        match self.pending.get(&to) {
            Some(request) if request.from == from => {}
            _ => return Err(TradeError::NoPendingRequest),
        }
        for player in [from, to] {
            if self.bindings.contains_key(&player) {
                return Err(TradeError::AlreadyTrading(player));
            }
        }
        let meeting_point = self.check_colocated(from, to)?;

        self.pending.remove(&to);
        self.pending.remove(&from);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let offer = Inventory::with_stack_limit(self.config.offer_slots, self.config.stack_limit);
        let slot = Arc::new(SessionSlot {
            session: Mutex::new(TradeSession::new(id, from, to, meeting_point, offer)),
            abort_requested: OnceLock::new(),
        });
        self.sessions.insert(id, slot);
        self.bindings.insert(from, id);
        self.bindings.insert(to, id);

        tracing::info!(session_id = id, left = %from, right = %to, "Trade session started");
        self.emit(TradeEvent::Started {
            session: id,
            left: from,
            right: to,
        });
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // Session actions
    // ------------------------------------------------------------------------

    pub fn session_of(&self, participant: AccountId) -> Option<SessionId> {
        self.bindings.get(&participant).map(|id| *id)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub async fn view(&self, participant: AccountId) -> Option<TradeView> {
        let slot = self.slot_of(participant).ok()?;
        let session = slot.session.lock().await;
        session.is_active().then(|| session.view())
    }

    /// Move up to `amount` of `kind` from the participant's inventory into
    /// their offer. Returns how many moved.
    pub async fn offer_items(
        &self,
        participant: AccountId,
        kind: &ItemKind,
        amount: u64,
    ) -> Result<u64, TradeError> {
        let slot = self.slot_of(participant)?;
        let mut session = slot.session.lock().await;
        let side = Self::active_side(&session, participant)?;

        let room = amount.min(session.offer(side).space_for(kind));
        let taken = self.world.take_items(participant, kind, room);
        if taken == 0 {
            return Ok(0);
        }

        let leftovers = session.add_items(side, split_into_stacks(kind, taken, self.config.stack_limit));
        let returned: u64 = leftovers.iter().map(|s| u64::from(s.count)).sum();
        give_or_spill(self.world.as_ref(), participant, leftovers, session.meeting_point());

        self.emit(TradeEvent::Updated(session.view()));
        Ok(taken - returned)
    }

    /// Move up to `amount` of `kind` from the participant's offer back to
    /// their inventory. Returns how many moved.
    pub async fn retract_items(
        &self,
        participant: AccountId,
        kind: &ItemKind,
        amount: u64,
    ) -> Result<u64, TradeError> {
        let slot = self.slot_of(participant)?;
        let mut session = slot.session.lock().await;
        let side = Self::active_side(&session, participant)?;

        let removed = session.remove_items(side, kind, amount);
        if removed > 0 {
            give_or_spill(
                self.world.as_ref(),
                participant,
                split_into_stacks(kind, removed, self.config.stack_limit),
                session.meeting_point(),
            );
            self.emit(TradeEvent::Updated(session.view()));
        }
        Ok(removed)
    }

    /// Set how much the participant pays into the trade. Checked against
    /// their balance now and again at settlement.
    pub async fn update_money(&self, participant: AccountId, amount: Amount) -> Result<(), TradeError> {
        if amount < 0 {
            return Err(TradeError::InvalidAmount(amount));
        }
        let slot = self.slot_of(participant)?;
        let mut session = slot.session.lock().await;
        let side = Self::active_side(&session, participant)?;

        let balance = self.ledger.refresh_balance(participant).await?;
        if amount > balance {
            return Err(TradeError::InsufficientFunds {
                required: amount,
                available: balance,
            });
        }

        session.set_money(side, amount);
        self.emit(TradeEvent::Updated(session.view()));
        Ok(())
    }

    /// Flip the participant's ready flag. When both sides are ready the
    /// trade settles before this returns.
    pub async fn toggle_ready(&self, participant: AccountId) -> Result<ReadyOutcome, TradeError> {
        let slot = self.slot_of(participant)?;
        let mut session = slot.session.lock().await;
        let side = Self::active_side(&session, participant)?;

        let ready = session.toggle_ready(side);
        if !session.both_ready() {
            self.emit(TradeEvent::Updated(session.view()));
            return Ok(ReadyOutcome::Waiting { ready });
        }

        match self.settle(&slot, &mut session).await {
            Ok(()) => {
                session.finish(SessionState::Settled);
                self.release(&session);

                let (left, right) = (session.participant(Side::Left), session.participant(Side::Right));
                tracing::info!(session_id = session.id(), left = %left, right = %right, "Trade settled");
                self.emit(TradeEvent::Settled {
                    session: session.id(),
                    left,
                    right,
                });
                Ok(ReadyOutcome::Settled(session.id()))
            }
            Err(reason) => {
                self.abort_locked(&mut session, reason.clone());
                Err(TradeError::Aborted(reason))
            }
        }
    }

    /// The participant walks away. Returns false if they had no live session.
    pub async fn cancel(&self, participant: AccountId) -> bool {
        match self.session_of(participant) {
            Some(id) => self.cancel_session(id, AbortReason::Cancelled(participant)).await,
            None => false,
        }
    }

    /// A player left the server: end their session and forget requests to
    /// or from them.
    pub async fn player_left(&self, player: AccountId) -> bool {
        self.pending.remove(&player);
        self.pending.retain(|_, request| request.from != player);
        match self.session_of(player) {
            Some(id) => self.cancel_session(id, AbortReason::Disconnected(player)).await,
            None => false,
        }
    }

    /// End a session and hand every staged item back. Idempotent: returns
    /// false if the session already ended.
    pub async fn cancel_session(&self, id: SessionId, reason: AbortReason) -> bool {
        let Some(slot) = self.sessions.get(&id).map(|slot| Arc::clone(&slot)) else {
            return false;
        };
        // First reason recorded wins, including one recorded mid-settlement.
        let _ = slot.abort_requested.set(reason.clone());

        let mut session = slot.session.lock().await;
        if !session.is_active() {
            return false;
        }
        let reason = slot.abort_requested.get().cloned().unwrap_or(reason);
        self.abort_locked(&mut session, reason);
        true
    }

    /// Abort every session whose participants went offline, changed world
    /// or drifted apart, and drop expired requests. Returns how many sessions
    /// were aborted. Meant to run from the game tick.
    pub async fn enforce_proximity(&self) -> usize {
        self.sweep_all_expired();

        let slots: Vec<Arc<SessionSlot>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut aborted = 0;
        for slot in slots {
            let mut session = slot.session.lock().await;
            if !session.is_active() {
                continue;
            }
            let left = session.participant(Side::Left);
            let right = session.participant(Side::Right);
            if let Err(err) = self.check_colocated(left, right) {
                let reason = match err {
                    TradeError::PlayerOffline(who) => AbortReason::Disconnected(who),
                    _ => AbortReason::TooFarApart,
                };
                self.abort_locked(&mut session, reason);
                aborted += 1;
            }
        }
        aborted
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn sweep_expired(&self, target: AccountId) {
        let ttl = self.config.request_ttl;
        if self
            .pending
            .remove_if(&target, |_, request| request.created_at.elapsed() >= ttl)
            .is_some()
        {
            tracing::debug!(player = %target, "Trade request expired");
        }
    }

    fn sweep_all_expired(&self) {
        let ttl = self.config.request_ttl;
        let before = self.pending.len();
        self.pending
            .retain(|_, request| request.created_at.elapsed() < ttl);
        let dropped = before.saturating_sub(self.pending.len());
        if dropped > 0 {
            tracing::debug!(dropped, "Expired trade requests swept");
        }
    }

    fn slot_of(&self, participant: AccountId) -> Result<Arc<SessionSlot>, TradeError> {
        let id = self.session_of(participant).ok_or(TradeError::NotInSession)?;
        self.sessions
            .get(&id)
            .map(|slot| Arc::clone(&slot))
            .ok_or(TradeError::NotInSession)
    }

    fn active_side(session: &TradeSession, participant: AccountId) -> Result<Side, TradeError> {
        if !session.is_active() {
            return Err(TradeError::NotInSession);
        }
        session.side_of(participant).ok_or(TradeError::NotInSession)
    }

    /// Both online, same world, within range. Returns the first player's
    /// position.
    fn check_colocated(&self, a: AccountId, b: AccountId) -> Result<Location, TradeError> {
        for player in [a, b] {
            if !self.world.is_online(player) {
                return Err(TradeError::PlayerOffline(player));
            }
        }
        let (Some(at_a), Some(at_b)) = (self.world.location(a), self.world.location(b)) else {
            return Err(TradeError::NotCoLocated);
        };
        match at_a.distance_to(&at_b) {
            Some(distance) if distance <= self.config.max_distance => Ok(at_a),
            _ => Err(TradeError::NotCoLocated),
        }
    }

    /// Validate, move money, then swap items. Any `Err` leaves balances and
    /// offers untouched.
    async fn settle(&self, slot: &SessionSlot, session: &mut TradeSession) -> Result<(), AbortReason> {
        for side in Side::BOTH {
            let player = session.participant(side);
            if !self.world.is_online(player) {
                return Err(AbortReason::Disconnected(player));
            }
        }

        for side in Side::BOTH {
            let recipient = session.participant(side);
            let incoming = session.offer(side.other()).contents();
            if !self.world.can_fit(recipient, &incoming) {
                return Err(AbortReason::InventoryFull(recipient));
            }
        }

        for side in Side::BOTH {
            let player = session.participant(side);
            let balance = self
                .ledger
                .refresh_balance(player)
                .await
                .map_err(|e| AbortReason::Storage(e.to_string()))?;
            if balance < session.money(side) {
                return Err(AbortReason::InsufficientFunds(player));
            }
        }

        if let Some(reason) = slot.abort_requested.get() {
            return Err(reason.clone());
        }

        if let Some((payer, payee, amount)) = session.net_transfer() {
            self.ledger
                .transfer_if(payer, payee, amount, ReasonCode::TradeSettlement, || {
                    slot.abort_requested.get().is_none()
                })
                .await
                .map_err(|e| match e {
                    LedgerError::InsufficientFunds { account, .. } => {
                        AbortReason::InsufficientFunds(account)
                    }
                    LedgerError::Withdrawn => slot
                        .abort_requested
                        .get()
                        .cloned()
                        .unwrap_or(AbortReason::Cancelled(payer)),
                    other => AbortReason::Storage(other.to_string()),
                })?;
            tracing::info!(
                session_id = session.id(),
                payer = %payer,
                payee = %payee,
                amount,
                "Trade money settled"
            );
        }

        let [from_left, from_right] = session.drain_offers();
        let meeting_point = session.meeting_point().clone();
        give_or_spill(
            self.world.as_ref(),
            session.participant(Side::Right),
            from_left,
            &meeting_point,
        );
        give_or_spill(
            self.world.as_ref(),
            session.participant(Side::Left),
            from_right,
            &meeting_point,
        );
        Ok(())
    }

    /// Return staged items to their owners and tear the session down.
    fn abort_locked(&self, session: &mut TradeSession, reason: AbortReason) {
        if !session.is_active() {
            return;
        }

        let [from_left, from_right] = session.drain_offers();
        let (left, right) = (session.participant(Side::Left), session.participant(Side::Right));
        let meeting_point = session.meeting_point().clone();
        give_or_spill(self.world.as_ref(), left, from_left, &meeting_point);
        give_or_spill(self.world.as_ref(), right, from_right, &meeting_point);

        session.finish(SessionState::Aborted);
        self.release(session);

        tracing::info!(
            session_id = session.id(),
            left = %left,
            right = %right,
            reason = %reason,
            "Trade aborted"
        );
        self.emit(TradeEvent::Aborted {
            session: session.id(),
            left,
            right,
            reason,
        });
    }

    fn release(&self, session: &TradeSession) {
        let id = session.id();
        self.sessions.remove(&id);
        for side in Side::BOTH {
            self.bindings
                .remove_if(&session.participant(side), |_, bound| *bound == id);
        }
    }

    fn emit(&self, event: TradeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::{Account, BalanceHistoryEntry, Journal};
    use crate::core::world::sim_world::SimWorld;
    use crate::infra::ledger::InMemoryBalanceStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    const LEFT: AccountId = AccountId::from_u128(1);
    const RIGHT: AccountId = AccountId::from_u128(2);
    const THIRD: AccountId = AccountId::from_u128(3);

    struct Fixture {
        world: Arc<SimWorld>,
        store: InMemoryBalanceStore,
        ledger: Arc<BalanceLedger<InMemoryBalanceStore>>,
        trades: TradeManager<InMemoryBalanceStore>,
    }

    fn spawn_point() -> Location {
        Location::new("overworld", 0.0, 64.0, 0.0)
    }

    fn diamond() -> ItemKind {
        ItemKind::new("minecraft:diamond")
    }

    fn populated_world() -> Arc<SimWorld> {
        let world = Arc::new(SimWorld::new());
        for (player, x) in [(LEFT, 0.0), (RIGHT, 2.0), (THIRD, 4.0)] {
            world.add_player(player, Location::new("overworld", x, 64.0, 0.0), 36);
        }
        world
    }

    fn fixture_with(config: TradeConfig) -> Fixture {
        let world = populated_world();
        let store = InMemoryBalanceStore::new();
        let ledger = Arc::new(BalanceLedger::new(store.clone()));
        let trades = TradeManager::new(
            Arc::clone(&ledger),
            Arc::clone(&world) as Arc<dyn GameWorld>,
            config,
        );
        Fixture {
            world,
            store,
            ledger,
            trades,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(TradeConfig::default())
    }

    async fn fund(fx: &Fixture, id: AccountId, amount: Amount) {
        fx.ledger.set_balance(id, amount, "test", None).await.unwrap();
    }

    async fn open_session(fx: &Fixture) -> SessionId {
        fx.trades.send_request(LEFT, RIGHT).unwrap();
        fx.trades.accept_request(RIGHT, LEFT).await.unwrap()
    }

    async fn settlement_entries(fx: &Fixture, id: AccountId) -> Vec<Amount> {
        fx.ledger
            .history(id, 50)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.reason == ReasonCode::TradeSettlement)
            .map(|e| e.delta)
            .collect()
    }

    #[tokio::test]
    async fn diamonds_for_money_settles_the_net_difference() {
        let fx = fixture();
        fund(&fx, LEFT, 100).await;
        fund(&fx, RIGHT, 100).await;
        fx.world.give(LEFT, "minecraft:diamond", 64);
        open_session(&fx).await;

        assert_eq!(fx.trades.offer_items(LEFT, &diamond(), 64).await.unwrap(), 64);
        fx.trades.update_money(LEFT, 20).await.unwrap();
        fx.trades.update_money(RIGHT, 50).await.unwrap();

        assert_eq!(
            fx.trades.toggle_ready(LEFT).await.unwrap(),
            ReadyOutcome::Waiting { ready: true }
        );
        assert!(matches!(
            fx.trades.toggle_ready(RIGHT).await.unwrap(),
            ReadyOutcome::Settled(_)
        ));

        assert_eq!(fx.ledger.get_balance(LEFT).await.unwrap(), 130);
        assert_eq!(fx.ledger.get_balance(RIGHT).await.unwrap(), 70);
        assert_eq!(fx.world.count(RIGHT, "minecraft:diamond"), 64);
        assert_eq!(fx.world.count(LEFT, "minecraft:diamond"), 0);
        assert!(fx.world.spilled().is_empty());
        assert_eq!(settlement_entries(&fx, LEFT).await, vec![30]);
        assert_eq!(fx.trades.session_of(LEFT), None);
        assert_eq!(fx.trades.active_sessions(), 0);
    }

    #[tokio::test]
    async fn opposing_money_offers_become_one_transfer() {
        let fx = fixture();
        fund(&fx, LEFT, 100).await;
        fund(&fx, RIGHT, 30).await;
        open_session(&fx).await;

        fx.trades.update_money(LEFT, 100).await.unwrap();
        fx.trades.update_money(RIGHT, 30).await.unwrap();
        fx.trades.toggle_ready(LEFT).await.unwrap();
        fx.trades.toggle_ready(RIGHT).await.unwrap();

        assert_eq!(settlement_entries(&fx, LEFT).await, vec![-70]);
        assert_eq!(settlement_entries(&fx, RIGHT).await, vec![70]);
        assert_eq!(fx.ledger.get_balance(LEFT).await.unwrap(), 30);
        assert_eq!(fx.ledger.get_balance(RIGHT).await.unwrap(), 100);
        assert_eq!(fx.store.total_balance(), 130);
    }

    #[tokio::test]
    async fn request_to_self_is_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.trades.send_request(LEFT, LEFT),
            Err(TradeError::SelfRequest)
        ));
        assert_eq!(fx.trades.pending_request_for(LEFT), None);
        assert_eq!(fx.trades.active_sessions(), 0);
    }

    #[tokio::test]
    async fn second_request_replaces_the_first() {
        let fx = fixture();
        fx.trades.send_request(LEFT, RIGHT).unwrap();
        fx.trades.send_request(THIRD, RIGHT).unwrap();
        assert_eq!(fx.trades.pending_request_for(RIGHT), Some(THIRD));

        assert!(matches!(
            fx.trades.accept_request(RIGHT, LEFT).await,
            Err(TradeError::NoPendingRequest)
        ));
        fx.trades.accept_request(RIGHT, THIRD).await.unwrap();
        assert_eq!(fx.trades.session_of(THIRD), fx.trades.session_of(RIGHT));
        assert_eq!(fx.trades.session_of(LEFT), None);
    }

    #[tokio::test]
    async fn requests_expire() {
        let fx = fixture_with(TradeConfig {
            request_ttl: Duration::ZERO,
            ..TradeConfig::default()
        });
        fx.trades.send_request(LEFT, RIGHT).unwrap();
        assert!(matches!(
            fx.trades.accept_request(RIGHT, LEFT).await,
            Err(TradeError::NoPendingRequest)
        ));
    }

    #[tokio::test]
    async fn denied_requests_are_gone() {
        let fx = fixture();
        fx.trades.send_request(LEFT, RIGHT).unwrap();
        assert!(!fx.trades.deny_request(RIGHT, THIRD));
        assert!(fx.trades.deny_request(RIGHT, LEFT));
        assert_eq!(fx.trades.pending_request_for(RIGHT), None);
    }

    #[tokio::test]
    async fn accepting_requires_players_to_be_close() {
        let fx = fixture();
        fx.world
            .move_to(RIGHT, Location::new("overworld", 100.0, 64.0, 0.0));
        fx.trades.send_request(LEFT, RIGHT).unwrap();
        assert!(matches!(
            fx.trades.accept_request(RIGHT, LEFT).await,
            Err(TradeError::NotCoLocated)
        ));

        fx.world.move_to(RIGHT, Location::new("nether", 0.0, 64.0, 0.0));
        assert!(matches!(
            fx.trades.accept_request(RIGHT, LEFT).await,
            Err(TradeError::NotCoLocated)
        ));
    }

    #[tokio::test]
    async fn one_session_per_player() {
        let fx = fixture();
        let first = open_session(&fx).await;

        assert!(matches!(
            fx.trades.send_request(THIRD, LEFT),
            Err(TradeError::AlreadyTrading(p)) if p == LEFT
        ));

        fx.trades.cancel(LEFT).await;
        let second = open_session(&fx).await;
        assert!(second > first);
    }

    #[tokio::test]
    async fn edits_clear_both_ready_flags() {
        let fx = fixture();
        fund(&fx, RIGHT, 10).await;
        open_session(&fx).await;

        fx.trades.toggle_ready(LEFT).await.unwrap();
        fx.trades.update_money(RIGHT, 5).await.unwrap();

        let view = fx.trades.view(LEFT).await.unwrap();
        assert_eq!(view.ready, [false, false]);
        assert_eq!(view.money, [0, 5]);
    }

    #[tokio::test]
    async fn money_offers_are_validated() {
        let fx = fixture();
        fund(&fx, LEFT, 10).await;
        open_session(&fx).await;

        assert!(matches!(
            fx.trades.update_money(LEFT, -1).await,
            Err(TradeError::InvalidAmount(-1))
        ));
        assert!(matches!(
            fx.trades.update_money(LEFT, 11).await,
            Err(TradeError::InsufficientFunds {
                required: 11,
                available: 10
            })
        ));
        assert!(matches!(
            fx.trades.update_money(THIRD, 1).await,
            Err(TradeError::NotInSession)
        ));
    }

    #[tokio::test]
    async fn cancel_returns_staged_items_and_is_idempotent() {
        let fx = fixture();
        fx.world.give(LEFT, "minecraft:diamond", 64);
        let id = open_session(&fx).await;
        fx.trades.offer_items(LEFT, &diamond(), 64).await.unwrap();
        assert_eq!(fx.world.count(LEFT, "minecraft:diamond"), 0);

        assert!(fx.trades.cancel(RIGHT).await);
        assert_eq!(fx.world.count(LEFT, "minecraft:diamond"), 64);
        assert_eq!(fx.trades.session_of(LEFT), None);

        assert!(!fx.trades.cancel(RIGHT).await);
        assert!(!fx.trades.cancel_session(id, AbortReason::TooFarApart).await);
        assert!(matches!(
            fx.trades.toggle_ready(LEFT).await,
            Err(TradeError::NotInSession)
        ));
    }

    #[tokio::test]
    async fn retracted_items_go_back() {
        let fx = fixture();
        fx.world.give(LEFT, "minecraft:diamond", 10);
        open_session(&fx).await;
        fx.trades.offer_items(LEFT, &diamond(), 10).await.unwrap();

        assert_eq!(fx.trades.retract_items(LEFT, &diamond(), 4).await.unwrap(), 4);
        assert_eq!(fx.world.count(LEFT, "minecraft:diamond"), 4);
        let view = fx.trades.view(RIGHT).await.unwrap();
        assert_eq!(view.offers[0][0].count, 6);
    }

    #[tokio::test]
    async fn full_inventory_blocks_settlement() {
        let fx = fixture();
        fx.world.add_player(RIGHT, Location::new("overworld", 2.0, 64.0, 0.0), 1);
        fx.world.give(RIGHT, "minecraft:dirt", 64);
        fx.world.give(LEFT, "minecraft:diamond", 64);
        fund(&fx, RIGHT, 50).await;
        open_session(&fx).await;

        fx.trades.offer_items(LEFT, &diamond(), 64).await.unwrap();
        fx.trades.update_money(RIGHT, 50).await.unwrap();
        fx.trades.toggle_ready(LEFT).await.unwrap();
        let result = fx.trades.toggle_ready(RIGHT).await;

        assert!(matches!(
            result,
            Err(TradeError::Aborted(AbortReason::InventoryFull(p))) if p == RIGHT
        ));
        assert_eq!(fx.world.count(LEFT, "minecraft:diamond"), 64);
        assert_eq!(fx.ledger.get_balance(RIGHT).await.unwrap(), 50);
        assert!(fx.world.spilled().is_empty());
    }

    #[tokio::test]
    async fn balances_are_rechecked_at_settlement() {
        let fx = fixture();
        fund(&fx, LEFT, 50).await;
        open_session(&fx).await;
        fx.trades.update_money(LEFT, 50).await.unwrap();
        fund(&fx, LEFT, 10).await;

        fx.trades.toggle_ready(LEFT).await.unwrap();
        let result = fx.trades.toggle_ready(RIGHT).await;

        assert!(matches!(
            result,
            Err(TradeError::Aborted(AbortReason::InsufficientFunds(p))) if p == LEFT
        ));
        assert_eq!(fx.ledger.get_balance(LEFT).await.unwrap(), 10);
        assert_eq!(fx.ledger.get_balance(RIGHT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recorded_cancel_beats_settlement() {
        let fx = fixture();
        fund(&fx, LEFT, 50).await;
        let id = open_session(&fx).await;
        fx.trades.update_money(LEFT, 50).await.unwrap();
        fx.trades.toggle_ready(LEFT).await.unwrap();

        // A cancel that arrived while settlement held the session lock.
        let slot = fx.trades.sessions.get(&id).map(|s| Arc::clone(&s)).unwrap();
        slot.abort_requested
            .set(AbortReason::Cancelled(RIGHT))
            .unwrap();

        let result = fx.trades.toggle_ready(RIGHT).await;
        assert!(matches!(
            result,
            Err(TradeError::Aborted(AbortReason::Cancelled(p))) if p == RIGHT
        ));
        assert_eq!(fx.ledger.get_balance(LEFT).await.unwrap(), 50);
        assert_eq!(fx.trades.session_of(RIGHT), None);
    }

    #[tokio::test]
    async fn proximity_sweep_aborts_separated_sessions() {
        let fx = fixture();
        fx.world.give(LEFT, "minecraft:diamond", 3);
        open_session(&fx).await;
        fx.trades.offer_items(LEFT, &diamond(), 3).await.unwrap();

        assert_eq!(fx.trades.enforce_proximity().await, 0);

        fx.world
            .move_to(RIGHT, Location::new("overworld", 50.0, 64.0, 0.0));
        let mut events = fx.trades.subscribe();
        assert_eq!(fx.trades.enforce_proximity().await, 1);

        assert_eq!(fx.world.count(LEFT, "minecraft:diamond"), 3);
        assert!(matches!(
            events.recv().await.unwrap(),
            TradeEvent::Aborted {
                reason: AbortReason::TooFarApart,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn disconnect_ends_the_session() {
        let fx = fixture();
        open_session(&fx).await;
        fx.world.set_online(RIGHT, false);

        assert!(fx.trades.player_left(RIGHT).await);
        assert_eq!(fx.trades.session_of(LEFT), None);
        assert_eq!(fx.trades.enforce_proximity().await, 0);
    }

    #[tokio::test]
    async fn staged_items_spill_at_the_owner_when_their_inventory_filled_up() {
        let fx = fixture();
        fx.world.add_player(LEFT, spawn_point(), 1);
        fx.world.give(LEFT, "minecraft:diamond", 64);
        open_session(&fx).await;
        fx.trades.offer_items(LEFT, &diamond(), 64).await.unwrap();
        fx.world.give(LEFT, "minecraft:dirt", 64);

        fx.trades.cancel(LEFT).await;
        assert_eq!(fx.world.spilled_summary(), "64x minecraft:diamond");
    }

    #[tokio::test]
    async fn money_offers_see_credits_from_another_ledger() {
        let fx = fixture();
        open_session(&fx).await;
        assert_eq!(fx.ledger.get_balance(LEFT).await.unwrap(), 0);

        // e.g. the admin tool writing to the same database
        let admin = BalanceLedger::new(fx.store.clone());
        admin.add_balance(LEFT, 40, None).await.unwrap();

        fx.trades.update_money(LEFT, 40).await.unwrap();
        assert_eq!(fx.trades.view(LEFT).await.unwrap().money, [40, 0]);
    }

    #[tokio::test]
    async fn expired_requests_are_swept_on_the_tick() {
        let fx = fixture_with(TradeConfig {
            request_ttl: Duration::ZERO,
            ..TradeConfig::default()
        });
        fx.trades.send_request(LEFT, RIGHT).unwrap();
        fx.trades.send_request(RIGHT, THIRD).unwrap();
        assert_eq!(fx.trades.pending.len(), 2);

        assert_eq!(fx.trades.enforce_proximity().await, 0);
        assert!(fx.trades.pending.is_empty());
    }

    /// Holds the first commit after `arm` until `release` is notified.
    #[derive(Clone, Default)]
    struct GatedStore {
        inner: InMemoryBalanceStore,
        armed: Arc<AtomicBool>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl GatedStore {
        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BalanceStore for GatedStore {
        async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
            self.inner.get_account(id).await
        }

        async fn upsert_account(
            &self,
            id: AccountId,
            name: &str,
            starting_balance: Amount,
        ) -> Result<Account, LedgerError> {
            self.inner.upsert_account(id, name, starting_balance).await
        }

        async fn set_balance(
            &self,
            id: AccountId,
            amount: Amount,
            name_if_new: &str,
            actor: Option<AccountId>,
        ) -> Result<BalanceHistoryEntry, LedgerError> {
            self.inner.set_balance(id, amount, name_if_new, actor).await
        }

        async fn commit(&self, journal: &Journal) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.commit(journal).await
        }

        async fn history(
            &self,
            id: AccountId,
            limit: usize,
        ) -> Result<Vec<BalanceHistoryEntry>, LedgerError> {
            self.inner.history(id, limit).await
        }

        async fn top_balances(&self, limit: usize) -> Result<Vec<Account>, LedgerError> {
            self.inner.top_balances(limit).await
        }
    }

    async fn settle_ticks() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn cancel_wins_while_settlement_waits_on_the_ledger() {
        let world = populated_world();
        let store = GatedStore::default();
        let ledger = Arc::new(BalanceLedger::new(store.clone()));
        let trades = Arc::new(TradeManager::new(
            Arc::clone(&ledger),
            Arc::clone(&world) as Arc<dyn GameWorld>,
            TradeConfig::default(),
        ));
        ledger.set_balance(LEFT, 50, "test", None).await.unwrap();
        world.give(RIGHT, "minecraft:diamond", 5);

        trades.send_request(LEFT, RIGHT).unwrap();
        trades.accept_request(RIGHT, LEFT).await.unwrap();
        trades.offer_items(RIGHT, &diamond(), 5).await.unwrap();
        trades.update_money(LEFT, 50).await.unwrap();
        trades.toggle_ready(LEFT).await.unwrap();

        // An unrelated deposit holds LEFT's account lock inside a slow commit.
        store.arm();
        let deposit = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move { ledger.add_balance(LEFT, 5, None).await }
        });
        store.entered.notified().await;

        let settlement = tokio::spawn({
            let trades = Arc::clone(&trades);
            async move { trades.toggle_ready(RIGHT).await }
        });
        settle_ticks().await;
        let cancel = tokio::spawn({
            let trades = Arc::clone(&trades);
            async move { trades.cancel(RIGHT).await }
        });
        settle_ticks().await;
        store.release.notify_one();

        deposit.await.unwrap().unwrap();
        assert!(matches!(
            settlement.await.unwrap(),
            Err(TradeError::Aborted(AbortReason::Cancelled(p))) if p == RIGHT
        ));
        assert!(!cancel.await.unwrap());

        assert_eq!(ledger.refresh_balance(LEFT).await.unwrap(), 55);
        assert_eq!(ledger.refresh_balance(RIGHT).await.unwrap(), 0);
        assert_eq!(world.count(RIGHT, "minecraft:diamond"), 5);
        assert_eq!(world.count(LEFT, "minecraft:diamond"), 0);
        assert_eq!(trades.session_of(LEFT), None);
    }

}
