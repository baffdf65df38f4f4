//! Fundamental types for the aquaring peer coordination protocol.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: tank and fish identities, ring directions, peer addresses,
//! timestamps, and the fish simulation state itself.

pub mod address;
pub mod direction;
pub mod fish;
pub mod tank;
pub mod time;

pub use address::PeerAddress;
pub use direction::Direction;
pub use fish::{FishId, FishModel, FISH_MAX_AGE_TICKS, TANK_HEIGHT, TANK_WIDTH};
pub use tank::TankId;
pub use time::Timestamp;
