// Simulated game world for tests: players with real inventories, positions
// and an online flag, plus a record of everything spilled on the ground.

use super::{GameWorld, Location};
use crate::core::items::{summarize, Inventory, ItemKind, ItemStack};
use crate::core::ledger::AccountId;
use dashmap::{DashMap, DashSet};
use std::sync::Mutex;

struct SimPlayer {
    inventory: Inventory,
    location: Location,
    online: bool,
}

#[derive(Default)]
pub struct SimWorld {
    players: DashMap<AccountId, SimPlayer>,
    bypass: DashSet<AccountId>,
    spilled: Mutex<Vec<(Location, ItemStack)>>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_player(&self, id: AccountId, location: Location, slots: usize) {
        self.players.insert(
            id,
            SimPlayer {
                inventory: Inventory::new(slots),
                location,
                online: true,
            },
        );
    }

    pub fn give(&self, id: AccountId, kind: &str, count: u64) {
        let mut player = self.players.get_mut(&id).unwrap();
        for stack in crate::core::items::split_into_stacks(&ItemKind::new(kind), count, 64) {
            assert_eq!(player.inventory.insert(stack), 0, "test inventory overflow");
        }
    }

    pub fn count(&self, id: AccountId, kind: &str) -> u64 {
        self.players
            .get(&id)
            .map(|p| p.inventory.count(&ItemKind::new(kind)))
            .unwrap_or(0)
    }

    pub fn inventory(&self, id: AccountId) -> Inventory {
        self.players.get(&id).unwrap().inventory.clone()
    }

    pub fn set_online(&self, id: AccountId, online: bool) {
        self.players.get_mut(&id).unwrap().online = online;
    }

    pub fn move_to(&self, id: AccountId, location: Location) {
        self.players.get_mut(&id).unwrap().location = location;
    }

    pub fn grant_bypass(&self, id: AccountId) {
        self.bypass.insert(id);
    }

    pub fn spilled(&self) -> Vec<ItemStack> {
        self.spilled
            .lock()
            .unwrap()
            .iter()
            .map(|(_, stack)| stack.clone())
            .collect()
    }

    pub fn spilled_summary(&self) -> String {
        summarize(&self.spilled())
    }
}

impl GameWorld for SimWorld {
    fn is_online(&self, player: AccountId) -> bool {
        self.players.get(&player).map(|p| p.online).unwrap_or(false)
    }

    fn location(&self, player: AccountId) -> Option<Location> {
        self.players.get(&player).map(|p| p.location.clone())
    }

    fn count_items(&self, player: AccountId, kind: &ItemKind) -> u64 {
        self.players
            .get(&player)
            .map(|p| p.inventory.count(kind))
            .unwrap_or(0)
    }

    fn take_items(&self, player: AccountId, kind: &ItemKind, amount: u64) -> u64 {
        self.players
            .get_mut(&player)
            .map(|mut p| p.inventory.extract(kind, amount))
            .unwrap_or(0)
    }

    fn can_fit(&self, player: AccountId, stacks: &[ItemStack]) -> bool {
        self.players
            .get(&player)
            .map(|p| p.inventory.can_fit_all(stacks))
            .unwrap_or(false)
    }

    fn give_items(&self, player: AccountId, stacks: Vec<ItemStack>) -> Vec<ItemStack> {
        match self.players.get_mut(&player) {
            Some(mut p) => p.inventory.insert_all(stacks),
            None => stacks,
        }
    }

    fn spill(&self, at: &Location, stacks: Vec<ItemStack>) {
        let mut spilled = self.spilled.lock().unwrap();
        spilled.extend(stacks.into_iter().map(|s| (at.clone(), s)));
    }

    fn can_bypass_ownership(&self, player: AccountId) -> bool {
        self.bypass.contains(&player)
    }
}
