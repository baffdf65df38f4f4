//! Fish location tracking.
//!
//! Two mechanisms coexist. Forward references record, per fish that ever
//! visited this tank, which way it last went; a location query follows the
//! chain hop by hop. The home agent shortcuts this for fish born here: the
//! home tank keeps the current host's address up to date, so a query for a
//! local fish is one forward at most.

use std::collections::HashMap;

use aquaring_types::{FishId, PeerAddress};

/// Where a fish known to this tank currently is, from this tank's view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hop {
    /// The fish swims here.
    Here,
    /// The fish was last handed to the left neighbor.
    Left,
    /// The fish was last handed to the right neighbor.
    Right,
}

/// Per-tank location state: forward references plus the home-agent table.
#[derive(Default)]
pub struct LocationTable {
    hops: HashMap<FishId, Hop>,
    /// Only populated for fish whose home tank is this one. `None` means the
    /// fish is (back) in its home tank.
    home_agent: HashMap<FishId, Option<PeerAddress>>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hop(&mut self, id: FishId, hop: Hop) {
        self.hops.insert(id, hop);
    }

    pub fn hop(&self, id: &FishId) -> Option<Hop> {
        self.hops.get(id).copied()
    }

    pub fn forget(&mut self, id: &FishId) {
        self.hops.remove(id);
    }

    /// Record the current host of a homed fish. `None` means it is local.
    pub fn set_home(&mut self, id: FishId, host: Option<PeerAddress>) {
        self.home_agent.insert(id, host);
    }

    /// Current host of a homed fish, if this tank is its home agent.
    /// Outer `None`: not our fish. Inner `None`: the fish is here.
    pub fn home(&self, id: &FishId) -> Option<Option<PeerAddress>> {
        self.home_agent.get(id).map(|h| *h)
    }
}
