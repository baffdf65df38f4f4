//! The broker service: message dispatch, membership changes, lease sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aquaring_messages::{
    JoinResponse, LeaveRequest, NameResolutionRequest, NameResolutionResponse, NeighborUpdate,
    WireMessage,
};
use aquaring_transport::Transport;
use aquaring_types::{Direction, PeerAddress, TankId, Timestamp};
use aquaring_utils::ShutdownController;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;

use crate::registry::ClientRegistry;
use crate::BrokerConfig;

/// A pending outbound message, collected while the registry lock is held
/// and sent after it is released.
type Outbound = (PeerAddress, WireMessage);

/// The membership broker.
///
/// All registry mutations and reads are serialized by one reader/writer
/// lock: joins, leaves and the lease sweep take the write lock, name
/// resolution takes the read lock. Inbound messages are dispatched to
/// tasks gated by a semaphore of `worker_count` permits, so processing
/// order across different peers is not guaranteed but registry mutations
/// are atomic with respect to each other.
pub struct Broker {
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
    registry: RwLock<ClientRegistry>,
    next_id: AtomicU64,
    workers: Arc<Semaphore>,
    shutdown: ShutdownController,
}

impl Broker {
    pub fn new(config: BrokerConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(config.worker_count));
        Arc::new(Self {
            config,
            transport,
            registry: RwLock::new(ClientRegistry::new()),
            next_id: AtomicU64::new(1),
            workers,
            shutdown: ShutdownController::new(),
        })
    }

    /// Stop the dispatch loop and the sweep task.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Identities currently in the ring, in ring order.
    pub async fn ring_ids(&self) -> Vec<TankId> {
        self.registry.read().await.ids()
    }

    /// Receive-and-dispatch loop. Runs until [`shutdown`](Self::shutdown).
    pub async fn run(self: Arc<Self>) {
        let sweeper = self.clone().spawn_sweeper();
        let mut shutdown_rx = self.shutdown.subscribe();
        tracing::info!(
            lease_ms = self.config.lease_duration_ms,
            workers = self.config.worker_count,
            "broker running"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                received = self.transport.recv() => match received {
                    Ok((msg, sender)) => {
                        let permit = self
                            .workers
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("worker semaphore closed");
                        let broker = self.clone();
                        tokio::spawn(async move {
                            broker.handle_message(msg, sender).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        tracing::warn!("broker transport closed: {e}");
                        break;
                    }
                },
            }
        }

        sweeper.abort();
        tracing::info!("broker stopped");
    }

    fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.config.sweep_interval_ms));
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => self.sweep_once(Timestamp::now()).await,
                }
            }
        })
    }

    async fn handle_message(&self, msg: WireMessage, sender: PeerAddress) {
        match msg {
            WireMessage::JoinRequest => self.handle_join(sender).await,
            WireMessage::LeaveRequest(req) => self.handle_leave(req).await,
            WireMessage::NameResolutionRequest(req) => self.handle_resolve(req, sender).await,
            // Peer-to-peer traffic never addresses the broker.
            other => {
                tracing::debug!(kind = other.kind(), %sender, "ignoring non-broker message");
            }
        }
    }

    /// Register a tank, or renew its lease when the address is already known.
    async fn handle_join(&self, sender: PeerAddress) {
        let now = Timestamp::now();
        let lease = self.config.lease_duration_ms;
        let mut sends: Vec<Outbound> = Vec::new();

        {
            let mut registry = self.registry.write().await;
            if let Some(index) = registry.index_of_address(sender) {
                // Duplicate join: lease renewal, not an error.
                registry.touch(index, now);
                let id = registry.record(index).id.clone();
                sends.push((
                    sender,
                    WireMessage::JoinResponse(JoinResponse {
                        tank_id: id.clone(),
                        lease_duration_ms: lease,
                    }),
                ));
                tracing::debug!(%id, %sender, "lease renewed");
            } else {
                let id = TankId::numbered(self.next_id.fetch_add(1, Ordering::Relaxed));
                let index = registry.insert(id.clone(), sender, now);
                let left = registry.left_neighbor_of(index);
                let right = registry.right_neighbor_of(index);

                sends.push((
                    sender,
                    WireMessage::JoinResponse(JoinResponse {
                        tank_id: id.clone(),
                        lease_duration_ms: lease,
                    }),
                ));
                sends.push((sender, neighbor_update(Direction::Left, left)));
                sends.push((sender, neighbor_update(Direction::Right, right)));
                sends.push((left, neighbor_update(Direction::Right, sender)));
                sends.push((right, neighbor_update(Direction::Left, sender)));

                if registry.len() == 1 {
                    // First member of the ring holds the token.
                    sends.push((sender, WireMessage::Token));
                }
                tracing::info!(%id, %sender, ring = registry.len(), "tank registered");
            }
        }

        self.send_all(sends).await;
    }

    /// Remove a tank and repair adjacency between its former neighbors.
    async fn handle_leave(&self, req: LeaveRequest) {
        let mut sends: Vec<Outbound> = Vec::new();
        {
            let mut registry = self.registry.write().await;
            if let Some(index) = registry.index_of_id(&req.tank_id) {
                sends = remove_and_repair(&mut registry, index);
                tracing::info!(id = %req.tank_id, ring = registry.len(), "tank left");
            } else {
                tracing::debug!(id = %req.tank_id, "leave for unknown tank");
            }
        }
        self.send_all(sends).await;
    }

    /// Answer a name resolution query under the read lock.
    async fn handle_resolve(&self, req: NameResolutionRequest, sender: PeerAddress) {
        let address = self.registry.read().await.resolve(&req.tank_id);
        if address.is_none() {
            tracing::debug!(id = %req.tank_id, "name resolution miss");
        }
        let reply = WireMessage::NameResolutionResponse(NameResolutionResponse {
            request_id: req.request_id,
            address,
        });
        self.send_all(vec![(sender, reply)]).await;
    }

    /// Evict every member whose lease has lapsed. Runs under the write
    /// lock; eviction uses the same neighbor repair as an explicit leave.
    pub async fn sweep_once(&self, now: Timestamp) {
        let mut sends: Vec<Outbound> = Vec::new();
        {
            let mut registry = self.registry.write().await;
            for id in registry.expired_ids(self.config.lease_duration_ms, now) {
                // Indices shift with each removal, so re-resolve per id.
                if let Some(index) = registry.index_of_id(&id) {
                    sends.extend(remove_and_repair(&mut registry, index));
                    tracing::info!(%id, ring = registry.len(), "lease expired, tank evicted");
                }
            }
        }
        self.send_all(sends).await;
    }

    async fn send_all(&self, sends: Vec<Outbound>) {
        for (to, msg) in sends {
            if let Err(e) = self.transport.send(to, msg).await {
                tracing::warn!(%to, "broker send failed: {e}");
            }
        }
    }
}

fn neighbor_update(direction: Direction, neighbor: PeerAddress) -> WireMessage {
    WireMessage::NeighborUpdate(NeighborUpdate {
        direction,
        neighbor,
    })
}

/// Remove the record at `index` and produce the two repair messages that
/// make its former neighbors mutual. An emptied ring needs no repair.
fn remove_and_repair(registry: &mut ClientRegistry, index: usize) -> Vec<Outbound> {
    let left = registry.left_neighbor_of(index);
    let right = registry.right_neighbor_of(index);
    registry.remove_at(index);
    if registry.is_empty() {
        return Vec::new();
    }
    vec![
        (left, neighbor_update(Direction::Right, right)),
        (right, neighbor_update(Direction::Left, left)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquaring_transport::{MemoryHub, MemoryTransport};

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            bind_addr: "unused".into(),
            lease_duration_ms: 10_000,
            sweep_interval_ms: 60_000,
            worker_count: 4,
        }
    }

    fn start_broker(hub: &MemoryHub, config: BrokerConfig) -> (Arc<Broker>, PeerAddress) {
        let endpoint = hub.open();
        let addr = endpoint.local_addr();
        let broker = Broker::new(config, Arc::new(endpoint));
        tokio::spawn(broker.clone().run());
        (broker, addr)
    }

    async fn next_msg(t: &MemoryTransport) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(1), t.recv())
            .await
            .expect("timed out waiting for message")
            .expect("transport closed")
            .0
    }

    /// Join and drain the registration burst, returning the assigned id.
    async fn join(t: &MemoryTransport, broker_addr: PeerAddress) -> TankId {
        t.send(broker_addr, WireMessage::JoinRequest).await.unwrap();
        match next_msg(t).await {
            WireMessage::JoinResponse(r) => r.tank_id,
            other => panic!("expected JoinResponse, got {:?}", other),
        }
    }

    async fn drain_neighbor_updates(t: &MemoryTransport, count: usize) -> Vec<NeighborUpdate> {
        let mut updates = Vec::new();
        while updates.len() < count {
            if let WireMessage::NeighborUpdate(u) = next_msg(t).await {
                updates.push(u);
            }
        }
        updates
    }

    #[tokio::test]
    async fn first_join_assigns_id_self_neighbors_and_token() {
        let hub = MemoryHub::new();
        let (_broker, broker_addr) = start_broker(&hub, test_config());
        let tank = hub.open();

        let id = join(&tank, broker_addr).await;
        assert_eq!(id, TankId::numbered(1));

        // Self-adjacency on both sides, then the four repair messages also
        // land here (new node is its own left and right), then the token.
        let mut saw_token = false;
        let mut neighbor_updates = Vec::new();
        for _ in 0..5 {
            match next_msg(&tank).await {
                WireMessage::NeighborUpdate(u) => neighbor_updates.push(u),
                WireMessage::Token => saw_token = true,
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert!(saw_token);
        assert!(neighbor_updates
            .iter()
            .all(|u| u.neighbor == tank.local_addr()));
    }

    #[tokio::test]
    async fn duplicate_join_is_lease_renewal() {
        let hub = MemoryHub::new();
        let (broker, broker_addr) = start_broker(&hub, test_config());
        let tank = hub.open();

        let first = join(&tank, broker_addr).await;
        // Drain neighbor updates + token from the initial registration.
        for _ in 0..5 {
            next_msg(&tank).await;
        }

        let second = join(&tank, broker_addr).await;
        assert_eq!(first, second);
        assert_eq!(broker.ring_ids().await, vec![first]);
    }

    #[tokio::test]
    async fn leave_repairs_former_neighbors() {
        let hub = MemoryHub::new();
        let (broker, broker_addr) = start_broker(&hub, test_config());
        let a = hub.open();
        let b = hub.open();
        let c = hub.open();

        join(&a, broker_addr).await;
        for _ in 0..5 {
            next_msg(&a).await; // self neighbors + token
        }
        join(&b, broker_addr).await;
        drain_neighbor_updates(&b, 2).await;
        drain_neighbor_updates(&a, 2).await;
        let b_id = TankId::numbered(2);
        join(&c, broker_addr).await;
        drain_neighbor_updates(&c, 2).await;
        drain_neighbor_updates(&a, 1).await;
        drain_neighbor_updates(&b, 1).await;

        // Ring is [A, B, C]; B leaves.
        b.send(
            broker_addr,
            WireMessage::LeaveRequest(LeaveRequest { tank_id: b_id }),
        )
        .await
        .unwrap();

        let a_update = drain_neighbor_updates(&a, 1).await.remove(0);
        assert_eq!(a_update.direction, Direction::Right);
        assert_eq!(a_update.neighbor, c.local_addr());

        let c_update = drain_neighbor_updates(&c, 1).await.remove(0);
        assert_eq!(c_update.direction, Direction::Left);
        assert_eq!(c_update.neighbor, a.local_addr());

        assert_eq!(
            broker.ring_ids().await,
            vec![TankId::numbered(1), TankId::numbered(3)]
        );
    }

    #[tokio::test]
    async fn resolves_known_and_unknown_names() {
        let hub = MemoryHub::new();
        let (_broker, broker_addr) = start_broker(&hub, test_config());
        let tank = hub.open();
        let id = join(&tank, broker_addr).await;
        for _ in 0..5 {
            next_msg(&tank).await;
        }

        let query = |tank_id: TankId, request_id: &str| {
            WireMessage::NameResolutionRequest(NameResolutionRequest {
                tank_id,
                request_id: request_id.into(),
            })
        };

        tank.send(broker_addr, query(id, "req-1")).await.unwrap();
        match next_msg(&tank).await {
            WireMessage::NameResolutionResponse(r) => {
                assert_eq!(r.request_id, "req-1");
                assert_eq!(r.address, Some(tank.local_addr()));
            }
            other => panic!("expected NameResolutionResponse, got {:?}", other),
        }

        tank.send(broker_addr, query(TankId::new("tank99"), "req-2"))
            .await
            .unwrap();
        match next_msg(&tank).await {
            WireMessage::NameResolutionResponse(r) => assert!(r.address.is_none()),
            other => panic!("expected NameResolutionResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sweep_evicts_lapsed_leases_and_repairs() {
        let hub = MemoryHub::new();
        let mut config = test_config();
        config.lease_duration_ms = 100;
        let (broker, broker_addr) = start_broker(&hub, config);
        let a = hub.open();
        let b = hub.open();

        join(&a, broker_addr).await;
        for _ in 0..5 {
            next_msg(&a).await;
        }
        join(&b, broker_addr).await;
        drain_neighbor_updates(&b, 2).await;
        drain_neighbor_updates(&a, 2).await;

        // Let both leases lapse, renew only A, then sweep: B is evicted
        // as an implicit leave, A stays and becomes its own neighbor again.
        tokio::time::sleep(Duration::from_millis(150)).await;
        a.send(broker_addr, WireMessage::JoinRequest).await.unwrap();
        next_msg(&a).await; // renewal JoinResponse

        broker.sweep_once(Timestamp::now()).await;

        assert_eq!(broker.ring_ids().await, vec![TankId::numbered(1)]);
        let repair = drain_neighbor_updates(&a, 2).await;
        assert!(repair.iter().all(|u| u.neighbor == a.local_addr()));
    }
}
