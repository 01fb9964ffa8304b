// Game-world port.
//
// The game engine owns player inventories, positions and permissions. The
// economy core only reaches them through this trait, so it can run against
// a real server or against the simulated world in tests.

use crate::core::items::{ItemKind, ItemStack};
use crate::core::ledger::AccountId;

/// A position in a named world (dimension).
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Euclidean distance, or `None` when the worlds differ.
    pub fn distance_to(&self, other: &Location) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        Some((dx * dx + dy * dy + dz * dz).sqrt())
    }

    /// Block coordinates as a stable key, e.g. `overworld:10,64,-3`.
    pub fn block_key(&self) -> String {
        format!(
            "{}:{},{},{}",
            self.world,
            self.x.floor() as i64,
            self.y.floor() as i64,
            self.z.floor() as i64
        )
    }
}

/// Everything the economy needs from the game.
///
/// Calls are synchronous: they run on the game thread and touch only
/// in-memory game state.
pub trait GameWorld: Send + Sync {
    fn is_online(&self, player: AccountId) -> bool;

    /// Current position, or the last known one for offline players.
    fn location(&self, player: AccountId) -> Option<Location>;

    fn count_items(&self, player: AccountId, kind: &ItemKind) -> u64;

    /// Remove up to `amount` of `kind`. Returns how many were removed.
    fn take_items(&self, player: AccountId, kind: &ItemKind, amount: u64) -> u64;

    /// Whether all stacks would fit in the player's inventory at once.
    fn can_fit(&self, player: AccountId, stacks: &[ItemStack]) -> bool;

    /// Insert into the player's inventory, returning what did not fit.
    fn give_items(&self, player: AccountId, stacks: Vec<ItemStack>) -> Vec<ItemStack>;

    /// Drop stacks into the world at a position.
    fn spill(&self, at: &Location, stacks: Vec<ItemStack>);

    /// Staff override for ownership checks.
    fn can_bypass_ownership(&self, player: AccountId) -> bool;
}

/// Hand items to a player, dropping whatever does not fit at their feet (or
/// at `fallback` when their position is unknown). Items are never discarded.
pub fn give_or_spill(
    world: &dyn GameWorld,
    player: AccountId,
    stacks: Vec<ItemStack>,
    fallback: &Location,
) {
    if stacks.is_empty() {
        return;
    }
    let leftovers = world.give_items(player, stacks);
    if leftovers.is_empty() {
        return;
    }

    let at = world.location(player).unwrap_or_else(|| fallback.clone());
    tracing::info!(
        player = %player,
        at = %at.block_key(),
        items = %crate::core::items::summarize(&leftovers),
        "Inventory full, dropping items in the world"
    );
    world.spill(&at, leftovers);
}
