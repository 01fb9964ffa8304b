// Item model - kinds, stacks and slot-bounded containers.
//
// Shop stock, trade offers and the test world's player inventories are all
// `Inventory` values. Counts per kind can exceed one stack, so aggregate
// counts are u64 while a single stack holds a u32.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Most items stack to 64.
pub const DEFAULT_STACK_LIMIT: u32 = 64;

/// Namespaced item identifier such as `minecraft:stone`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKind(String);

impl ItemKind {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub kind: ItemKind,
    pub count: u32,
}

impl ItemStack {
    pub fn new(kind: ItemKind, count: u32) -> Self {
        Self { kind, count }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Split `count` items into stacks no larger than `stack_limit`.
pub fn split_into_stacks(kind: &ItemKind, count: u64, stack_limit: u32) -> Vec<ItemStack> {
    let limit = u64::from(stack_limit.max(1));
    let mut stacks = Vec::new();
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(limit);
        stacks.push(ItemStack::new(kind.clone(), take as u32));
        remaining -= take;
    }
    stacks
}

/// Total count per kind, in first-seen order.
pub fn totals_by_kind(stacks: &[ItemStack]) -> Vec<(ItemKind, u64)> {
    let mut totals: Vec<(ItemKind, u64)> = Vec::new();
    for stack in stacks.iter().filter(|s| !s.is_empty()) {
        match totals.iter_mut().find(|(kind, _)| *kind == stack.kind) {
            Some((_, total)) => *total += u64::from(stack.count),
            None => totals.push((stack.kind.clone(), u64::from(stack.count))),
        }
    }
    totals
}

/// Compact, human-readable summary: `64x minecraft:stone, 3x minecraft:dirt`.
pub fn summarize(stacks: &[ItemStack]) -> String {
    totals_by_kind(stacks)
        .iter()
        .map(|(kind, total)| format!("{}x {}", total, kind))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// INVENTORY
// ============================================================================

/// Fixed number of slots, each holding at most `stack_limit` of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    slots: Vec<Option<ItemStack>>,
    stack_limit: u32,
}

impl Inventory {
    pub fn new(slot_count: usize) -> Self {
        Self::with_stack_limit(slot_count, DEFAULT_STACK_LIMIT)
    }

    pub fn with_stack_limit(slot_count: usize, stack_limit: u32) -> Self {
        Self {
            slots: vec![None; slot_count],
            stack_limit: stack_limit.max(1),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn stack_limit(&self) -> u32 {
        self.stack_limit
    }

    pub fn slots(&self) -> &[Option<ItemStack>] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Non-empty stacks, in slot order.
    pub fn contents(&self) -> Vec<ItemStack> {
        self.slots.iter().flatten().cloned().collect()
    }

    pub fn count(&self, kind: &ItemKind) -> u64 {
        self.slots
            .iter()
            .flatten()
            .filter(|stack| stack.kind == *kind)
            .map(|stack| u64::from(stack.count))
            .sum()
    }

    /// How many more of `kind` fit: headroom in matching stacks plus every
    /// empty slot.
    pub fn space_for(&self, kind: &ItemKind) -> u64 {
        self.slots
            .iter()
            .map(|slot| match slot {
                None => u64::from(self.stack_limit),
                Some(stack) if stack.kind == *kind => {
                    u64::from(self.stack_limit.saturating_sub(stack.count))
                }
                Some(_) => 0,
            })
            .sum()
    }

    /// Insert a stack, topping up matching stacks before opening empty
    /// slots. Returns how many items did not fit.
    pub fn insert(&mut self, stack: ItemStack) -> u32 {
        let mut remaining = stack.count;
        if remaining == 0 {
            return 0;
        }

        for existing in self.slots.iter_mut().flatten() {
            if existing.kind != stack.kind {
                continue;
            }
            let room = self.stack_limit.saturating_sub(existing.count);
            let moved = room.min(remaining);
            existing.count += moved;
            remaining -= moved;
            if remaining == 0 {
                return 0;
            }
        }

        for slot in self.slots.iter_mut().filter(|slot| slot.is_none()) {
            let moved = self.stack_limit.min(remaining);
            *slot = Some(ItemStack::new(stack.kind.clone(), moved));
            remaining -= moved;
            if remaining == 0 {
                return 0;
            }
        }

        remaining
    }

    /// Insert several stacks, returning whatever did not fit.
    pub fn insert_all(&mut self, stacks: Vec<ItemStack>) -> Vec<ItemStack> {
        let mut leftovers = Vec::new();
        for stack in stacks {
            let kind = stack.kind.clone();
            let left = self.insert(stack);
            if left > 0 {
                leftovers.push(ItemStack::new(kind, left));
            }
        }
        leftovers
    }

    /// Remove up to `amount` of `kind`, draining from the last slot
    /// backwards. Returns how many were removed.
    pub fn extract(&mut self, kind: &ItemKind, amount: u64) -> u64 {
        let mut remaining = amount;
        for slot in self.slots.iter_mut().rev() {
            if remaining == 0 {
                break;
            }
            let Some(stack) = slot else { continue };
            if stack.kind != *kind {
                continue;
            }
            let taken = u64::from(stack.count).min(remaining);
            stack.count -= taken as u32;
            remaining -= taken;
            if stack.count == 0 {
                *slot = None;
            }
        }
        amount - remaining
    }

    /// Whether every stack would fit at once, without changing anything.
    pub fn can_fit_all(&self, stacks: &[ItemStack]) -> bool {
        let mut scratch = self.clone();
        stacks
            .iter()
            .all(|stack| scratch.insert(stack.clone()) == 0)
    }

    pub fn take_slot(&mut self, index: usize) -> Option<ItemStack> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Empty the container, returning everything it held.
    pub fn drain(&mut self) -> Vec<ItemStack> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
