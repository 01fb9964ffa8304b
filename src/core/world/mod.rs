// World module - the boundary to the game engine.

mod game_world;
#[cfg(test)]
pub mod sim_world;

pub use game_world::{give_or_spill, GameWorld, Location};
