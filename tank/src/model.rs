//! The tank state machine.
//!
//! [`TankModel`] is deliberately transport-free: every inbound message and
//! every timer firing is a method call, and each call returns the messages
//! to send in response. The node layer serializes all calls behind one
//! mutex, which gives the protocol the per-node atomicity the snapshot and
//! token logic assume.

use rand::Rng;
use tracing::{debug, info, warn};

use aquaring_messages::{
    Handoff, LeaveRequest, LocationRequest, LocationUpdate, NameResolutionRequest,
    NameResolutionResponse, SnapshotToken, WireMessage,
};
use aquaring_types::fish::{FISH_HEIGHT, FISH_WIDTH, TANK_HEIGHT, TANK_WIDTH};
use aquaring_types::{Direction, FishId, FishModel, PeerAddress, TankId};

use crate::events::{EventBus, TankEvent};
use crate::location::{Hop, LocationTable};
use crate::snapshot::{RecordMode, SnapshotState};

/// Messages a model call wants sent, with their destinations.
pub type Outbox = Vec<(PeerAddress, WireMessage)>;

pub struct TankModel {
    broker_addr: PeerAddress,
    my_addr: PeerAddress,
    id: Option<TankId>,
    lease_duration_ms: u64,
    left_neighbor: Option<PeerAddress>,
    right_neighbor: Option<PeerAddress>,
    fishies: Vec<FishModel>,
    fish_counter: u32,
    has_token: bool,
    snapshot: SnapshotState,
    locations: LocationTable,
    events: EventBus,
    max_fish: usize,
}

impl TankModel {
    pub fn new(broker_addr: PeerAddress, my_addr: PeerAddress, max_fish: usize) -> Self {
        Self {
            broker_addr,
            my_addr,
            id: None,
            lease_duration_ms: 0,
            left_neighbor: None,
            right_neighbor: None,
            fishies: Vec::new(),
            fish_counter: 0,
            has_token: false,
            snapshot: SnapshotState::new(),
            locations: LocationTable::new(),
            events: EventBus::new(),
            max_fish,
        }
    }

    pub fn id(&self) -> Option<&TankId> {
        self.id.as_ref()
    }

    pub fn broker_addr(&self) -> PeerAddress {
        self.broker_addr
    }

    pub fn lease_duration_ms(&self) -> u64 {
        self.lease_duration_ms
    }

    pub fn population(&self) -> usize {
        self.fishies.len()
    }

    pub fn holds_token(&self) -> bool {
        self.has_token
    }

    /// Current host of a homed fish, if this tank is its home agent.
    pub fn home_of(&self, id: &FishId) -> Option<Option<PeerAddress>> {
        self.locations.home(id)
    }

    pub fn subscribe(&mut self, listener: Box<dyn Fn(&TankEvent) + Send + Sync>) {
        self.events.subscribe(listener);
    }

    /// Dispatch one inbound message.
    pub fn handle_message(&mut self, from: PeerAddress, msg: WireMessage) -> Outbox {
        match msg {
            WireMessage::JoinResponse(r) => self.on_join_response(r.tank_id, r.lease_duration_ms),
            WireMessage::NeighborUpdate(u) => {
                self.set_neighbor(u.direction, u.neighbor);
                Vec::new()
            }
            WireMessage::Handoff(h) => self.receive_fish(from, h.fish),
            WireMessage::Token => {
                self.receive_token();
                Vec::new()
            }
            WireMessage::SnapshotMarker => self.on_snapshot_marker(from),
            WireMessage::SnapshotToken(t) => self.on_snapshot_token(t),
            WireMessage::NameResolutionResponse(r) => self.on_name_resolution(r),
            WireMessage::LocationRequest(r) => self.locate_fish(r.fish_id),
            WireMessage::LocationUpdate(u) => {
                self.locations.set_home(u.fish_id, Some(u.location));
                Vec::new()
            }
            other => {
                warn!(from = %from, kind = other.kind(), "unexpected message at tank node");
                Vec::new()
            }
        }
    }

    fn on_join_response(&mut self, tank_id: TankId, lease_duration_ms: u64) -> Outbox {
        self.lease_duration_ms = lease_duration_ms;
        if self.id.as_ref() == Some(&tank_id) {
            debug!(id = %tank_id, "lease renewed");
            return Vec::new();
        }
        // The broker's id is authoritative: after an eviction the renewal
        // path re-registers and comes back with a fresh identity, which
        // every later LeaveRequest and snapshot round must carry.
        let first_registration = self.id.is_none();
        info!(id = %tank_id, lease_duration_ms, "registered with broker");
        self.id = Some(tank_id.clone());
        self.events.emit(&TankEvent::Registered {
            id: tank_id,
            lease_duration_ms,
        });
        if first_registration {
            self.spawn_fish();
        }
        Vec::new()
    }

    /// Spawn a fish at a random position, up to the configured limit.
    pub fn spawn_fish(&mut self) {
        let Some(id) = self.id.clone() else {
            warn!("cannot spawn fish before registration");
            return;
        };
        if self.fishies.len() >= self.max_fish {
            warn!(max = self.max_fish, "tank is full, not spawning");
            return;
        }
        self.fish_counter += 1;
        let fish_id = FishId::new(self.fish_counter, &id);
        let mut rng = rand::thread_rng();
        let direction = if rng.gen_bool(0.5) {
            Direction::Left
        } else {
            Direction::Right
        };
        let fish = FishModel::new(
            fish_id.clone(),
            rng.gen_range(0..TANK_WIDTH - FISH_WIDTH),
            rng.gen_range(0..TANK_HEIGHT - FISH_HEIGHT),
            direction,
        );
        self.locations.set_hop(fish_id.clone(), Hop::Here);
        self.locations.set_home(fish_id.clone(), None);
        self.fishies.push(fish);
        self.events.emit(&TankEvent::FishSpawned { id: fish_id });
    }

    fn set_neighbor(&mut self, direction: Direction, neighbor: PeerAddress) {
        info!(%direction, %neighbor, "neighbor update");
        match direction {
            Direction::Left => self.left_neighbor = Some(neighbor),
            Direction::Right => self.right_neighbor = Some(neighbor),
        }
    }

    fn receive_token(&mut self) {
        debug!("token received");
        self.has_token = true;
        self.events.emit(&TankEvent::TokenChanged { held: true });
    }

    /// Pass the token to the left neighbor after the hold interval.
    pub fn release_token(&mut self) -> Outbox {
        if !self.has_token {
            return Vec::new();
        }
        let Some(left) = self.left_neighbor else {
            // Nobody to pass to yet; keep it rather than drop it from the ring.
            return Vec::new();
        };
        self.has_token = false;
        self.events.emit(&TankEvent::TokenChanged { held: false });
        vec![(left, WireMessage::Token)]
    }

    /// Advance the simulation one tick: move fish, hand off or bounce at
    /// the edges, and retire fish that exceeded their lifetime.
    pub fn tick(&mut self) -> Outbox {
        let mut outbox = Vec::new();
        let mut i = 0;
        while i < self.fishies.len() {
            self.fishies[i].update();
            if self.fishies[i].disappears() {
                let fish = self.fishies.remove(i);
                debug!(fish = %fish.id, "fish disappeared of old age");
                self.locations.forget(&fish.id);
                continue;
            }
            if self.fishies[i].hits_edge() {
                let neighbor = match self.fishies[i].direction {
                    Direction::Left => self.left_neighbor,
                    Direction::Right => self.right_neighbor,
                };
                match neighbor {
                    Some(addr) if self.has_token => {
                        let fish = self.fishies.remove(i);
                        let direction = fish.direction;
                        let hop = match direction {
                            Direction::Left => Hop::Left,
                            Direction::Right => Hop::Right,
                        };
                        self.locations.set_hop(fish.id.clone(), hop);
                        self.events.emit(&TankEvent::FishHandedOff {
                            id: fish.id.clone(),
                            direction,
                        });
                        outbox.push((addr, WireMessage::Handoff(Handoff { fish })));
                        continue;
                    }
                    _ => self.fishies[i].reverse(),
                }
            }
            i += 1;
        }
        outbox
    }

    /// A fish arrived from a neighbor. Buffered if the snapshot is still
    /// recording that channel, otherwise it enters the tank.
    fn receive_fish(&mut self, from: PeerAddress, fish: FishModel) -> Outbox {
        let from_left = self.left_neighbor == Some(from);
        if self.snapshot.should_buffer(from_left) {
            debug!(fish = %fish.id, from_left, "buffering in-flight fish for snapshot");
            self.snapshot.buffer(from_left, fish);
            return Vec::new();
        }
        self.deliver_fish(fish)
    }

    /// Let a fish enter the tank and update the location bookkeeping.
    fn deliver_fish(&mut self, mut fish: FishModel) -> Outbox {
        let mut outbox = Vec::new();
        fish.enter_tank();
        self.locations.set_hop(fish.id.clone(), Hop::Here);
        self.events.emit(&TankEvent::FishArrived {
            id: fish.id.clone(),
        });
        let home = fish.home_tank();
        if self.id.as_ref() == Some(&home) {
            // One of ours came back; we are its home agent.
            self.locations.set_home(fish.id.clone(), None);
        } else {
            // Foreign fish: tell its home agent where it is now, via the
            // broker's name resolution.
            outbox.push((
                self.broker_addr,
                WireMessage::NameResolutionRequest(NameResolutionRequest {
                    tank_id: home,
                    request_id: fish.id.to_string(),
                }),
            ));
        }
        self.fishies.push(fish);
        outbox
    }

    /// Start a snapshot round.
    pub fn initiate_snapshot(&mut self) -> Outbox {
        if self.snapshot.active {
            warn!("snapshot already in progress");
            return Vec::new();
        }
        let (Some(left), Some(right)) = (self.left_neighbor, self.right_neighbor) else {
            warn!("cannot snapshot without ring neighbors");
            return Vec::new();
        };
        info!(count = self.fishies.len(), "initiating snapshot");
        self.snapshot
            .begin(self.fishies.len() as u64, RecordMode::Both, true);
        vec![
            (left, WireMessage::SnapshotMarker),
            (right, WireMessage::SnapshotMarker),
        ]
    }

    fn on_snapshot_marker(&mut self, from: PeerAddress) -> Outbox {
        let mut outbox = Vec::new();
        if !self.snapshot.active {
            // First marker of the round: capture the local state and send
            // markers out on both channels before closing any.
            self.snapshot
                .begin(self.fishies.len() as u64, RecordMode::Both, false);
            if let (Some(left), Some(right)) = (self.left_neighbor, self.right_neighbor) {
                outbox.push((left, WireMessage::SnapshotMarker));
                outbox.push((right, WireMessage::SnapshotMarker));
            }
        }
        let from_left = if self.left_neighbor == self.right_neighbor {
            // Degenerate ring: both logical channels share one sender
            // address, so close them in a fixed order instead.
            matches!(self.snapshot.mode, RecordMode::Both | RecordMode::Left)
        } else {
            self.left_neighbor == Some(from)
        };
        if self.snapshot.close_channel(from_left) {
            self.finish_local_snapshot(&mut outbox);
        }
        outbox
    }

    fn on_snapshot_token(&mut self, token: SnapshotToken) -> Outbox {
        if !self.snapshot.finished {
            debug!("parking snapshot token until local snapshot finishes");
            self.snapshot.parked_token = Some(token);
            return Vec::new();
        }
        self.handle_token(token)
    }

    /// Fold the local count into the circulating sum, then either complete
    /// the round (initiator) or pass the token left.
    fn handle_token(&mut self, token: SnapshotToken) -> Outbox {
        let mut sum = token.running_sum;
        if !self.snapshot.added {
            sum += self.snapshot.local_count;
            self.snapshot.added = true;
        }
        if self.id.as_ref() == Some(&token.initiator_id) {
            info!(population = sum, "snapshot round complete");
            self.events
                .emit(&TankEvent::SnapshotComplete { population: sum });
            self.snapshot.reset();
            return Vec::new();
        }
        self.snapshot.reset();
        match self.left_neighbor {
            Some(left) => vec![(
                left,
                WireMessage::SnapshotToken(SnapshotToken {
                    initiator_id: token.initiator_id,
                    running_sum: sum,
                }),
            )],
            None => {
                warn!("no left neighbor to pass snapshot token to");
                Vec::new()
            }
        }
    }

    fn finish_local_snapshot(&mut self, outbox: &mut Outbox) {
        let buffered = self.snapshot.finish();
        debug!(
            local_count = self.snapshot.local_count,
            buffered = buffered.len(),
            "local snapshot finished"
        );
        for fish in buffered {
            outbox.extend(self.deliver_fish(fish));
        }
        if self.snapshot.initiator {
            let (Some(id), Some(left)) = (self.id.clone(), self.left_neighbor) else {
                return;
            };
            self.snapshot.added = true;
            outbox.push((
                left,
                WireMessage::SnapshotToken(SnapshotToken {
                    initiator_id: id,
                    running_sum: self.snapshot.local_count,
                }),
            ));
        } else if let Some(token) = self.snapshot.parked_token.take() {
            outbox.extend(self.handle_token(token));
        }
    }

    /// Resolve where a fish currently swims, following forward references
    /// or the home-agent table.
    pub fn locate_fish(&mut self, fish_id: FishId) -> Outbox {
        // Home agent shortcut for fish born here.
        if self.id.as_ref() == Some(&fish_id.home_tank()) {
            match self.locations.home(&fish_id) {
                Some(None) => {
                    self.events.emit(&TankEvent::FishLocated { id: fish_id });
                    return Vec::new();
                }
                Some(Some(host)) => {
                    return vec![(
                        host,
                        WireMessage::LocationRequest(LocationRequest { fish_id }),
                    )]
                }
                None => {}
            }
        }
        match self.locations.hop(&fish_id) {
            Some(Hop::Here) => {
                self.events.emit(&TankEvent::FishLocated { id: fish_id });
                Vec::new()
            }
            Some(Hop::Left) => match self.left_neighbor {
                Some(left) => vec![(
                    left,
                    WireMessage::LocationRequest(LocationRequest { fish_id }),
                )],
                None => Vec::new(),
            },
            Some(Hop::Right) => match self.right_neighbor {
                Some(right) => vec![(
                    right,
                    WireMessage::LocationRequest(LocationRequest { fish_id }),
                )],
                None => Vec::new(),
            },
            None => {
                warn!(fish = %fish_id, "location request for unknown fish");
                Vec::new()
            }
        }
    }

    /// The broker resolved a home tank's address; report the fish's
    /// current host to its home agent.
    fn on_name_resolution(&mut self, resp: NameResolutionResponse) -> Outbox {
        let Some(home_addr) = resp.address else {
            debug!(request_id = %resp.request_id, "home tank unknown to broker");
            return Vec::new();
        };
        vec![(
            home_addr,
            WireMessage::LocationUpdate(LocationUpdate {
                fish_id: FishId::from(resp.request_id),
                location: self.my_addr,
            }),
        )]
    }

    /// Announce departure to the broker.
    pub fn leave(&self) -> Outbox {
        match &self.id {
            Some(id) => vec![(
                self.broker_addr,
                WireMessage::LeaveRequest(LeaveRequest {
                    tank_id: id.clone(),
                }),
            )],
            None => Vec::new(),
        }
    }
}
