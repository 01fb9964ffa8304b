// Items - kinds, stacks and containers shared by shops and trades.

mod item_model;

pub use item_model::{
    split_into_stacks, summarize, totals_by_kind, Inventory, ItemKind, ItemStack,
    DEFAULT_STACK_LIMIT,
};
