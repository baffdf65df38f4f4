//! State-change events emitted after node state mutations.
//!
//! The rendering layer (or a test) subscribes to these instead of
//! observing node internals; the protocol core never depends on who is
//! listening.

use aquaring_types::{Direction, FishId, TankId};

/// Events observers can subscribe to via the [`EventBus`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TankEvent {
    /// Registration (or re-registration) with the broker completed.
    Registered {
        id: TankId,
        lease_duration_ms: u64,
    },
    /// A fish was spawned locally.
    FishSpawned { id: FishId },
    /// A fish arrived from a neighbor.
    FishArrived { id: FishId },
    /// A fish was handed off to a neighbor.
    FishHandedOff { id: FishId, direction: Direction },
    /// The ring token was received or passed on.
    TokenChanged { held: bool },
    /// A location query found the fish in this tank.
    FishLocated { id: FishId },
    /// A snapshot round this node initiated completed.
    SnapshotComplete { population: u64 },
}

/// Synchronous fan-out event bus.
///
/// Listeners are invoked inline on the emitting task; keep handlers fast to
/// avoid stalling message processing.
pub struct EventBus {
    listeners: Vec<Box<dyn Fn(&TankEvent) + Send + Sync>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Box<dyn Fn(&TankEvent) + Send + Sync>) {
        self.listeners.push(listener);
    }

    pub fn emit(&self, event: &TankEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn all_listeners_receive_each_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();
        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        bus.emit(&TankEvent::TokenChanged { held: true });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
