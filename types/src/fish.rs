//! Fish identity and simulation state.
//!
//! A fish is the mobile object of the system: it swims across its tank,
//! and when it reach an edge it is handed off to the neighboring tank (or
//! reversed, depending on token possession — that policy lives in the tank
//! crate, not here).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::direction::Direction;
use crate::tank::TankId;

/// Tank width in simulation units.
pub const TANK_WIDTH: i32 = 600;
/// Tank height in simulation units.
pub const TANK_HEIGHT: i32 = 350;
/// Horizontal fish extent, used for edge detection.
pub const FISH_WIDTH: i32 = 40;
/// Vertical fish extent.
pub const FISH_HEIGHT: i32 = 20;
/// Horizontal distance a fish covers per simulation tick.
pub const FISH_STEP: i32 = 2;
/// Ticks after which a fish disappears from the simulation.
pub const FISH_MAX_AGE_TICKS: u32 = 10_000;

/// Identity of a fish: `fish<N>@<home-tank-id>`.
///
/// The identity embeds the home tank, which makes every fish id globally
/// unique and lets any peer recover the home tank for location tracking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FishId(String);

impl FishId {
    /// Build the id of the `n`-th fish spawned at `home`.
    pub fn new(n: u32, home: &TankId) -> Self {
        Self(format!("fish{n}@{home}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The home tank embedded in this id.
    pub fn home_tank(&self) -> TankId {
        match self.0.split_once('@') {
            Some((_, tank)) => TankId::new(tank),
            None => TankId::new(self.0.as_str()),
        }
    }
}

impl From<String> for FishId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FishId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Full simulation state of one fish.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FishModel {
    pub id: FishId,
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
    /// Ticks lived so far, across all tanks visited.
    pub age_ticks: u32,
}

impl FishModel {
    pub fn new(id: FishId, x: i32, y: i32, direction: Direction) -> Self {
        let x = x.min(TANK_WIDTH - FISH_WIDTH - 1).max(0);
        let y = y.min(TANK_HEIGHT - FISH_HEIGHT).max(0);
        Self {
            id,
            x,
            y,
            direction,
            age_ticks: 0,
        }
    }

    /// The home tank of this fish.
    pub fn home_tank(&self) -> TankId {
        self.id.home_tank()
    }

    /// Advance the fish one simulation tick.
    pub fn update(&mut self) {
        match self.direction {
            Direction::Left => self.x -= FISH_STEP,
            Direction::Right => self.x += FISH_STEP,
        }
        self.age_ticks = self.age_ticks.saturating_add(1);
    }

    /// Whether the fish has reached the tank edge in its travel direction.
    pub fn hits_edge(&self) -> bool {
        match self.direction {
            Direction::Left => self.x <= 0,
            Direction::Right => self.x >= TANK_WIDTH - FISH_WIDTH,
        }
    }

    /// Turn the fish around.
    pub fn reverse(&mut self) {
        self.direction = self.direction.opposite();
    }

    /// Place the fish at the entry edge of the tank it just arrived in.
    ///
    /// A fish that left its old tank via the right edge keeps swimming right
    /// and therefore enters the new tank at the left edge, and vice versa.
    pub fn enter_tank(&mut self) {
        self.x = match self.direction {
            Direction::Right => 0,
            Direction::Left => TANK_WIDTH - FISH_WIDTH,
        };
    }

    /// Whether the fish has exceeded its lifetime and leaves the simulation.
    pub fn disappears(&self) -> bool {
        self.age_ticks >= FISH_MAX_AGE_TICKS
    }
}
