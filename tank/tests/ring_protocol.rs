//! End-to-end ring protocol tests: broker plus tank nodes over the
//! in-memory transport.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aquaring_broker::{Broker, BrokerConfig};
use aquaring_messages::{JoinResponse, NeighborUpdate, WireMessage};
use aquaring_tank::{TankConfig, TankEvent, TankNode};
use aquaring_transport::{MemoryHub, Transport};
use aquaring_types::{Direction, FishId, PeerAddress, TankId, Timestamp};

/// An hour, to park a timer a test does not want firing.
const NEVER_MS: u64 = 3_600_000;

fn broker_config(lease_duration_ms: u64, sweep_interval_ms: u64) -> BrokerConfig {
    BrokerConfig {
        lease_duration_ms,
        sweep_interval_ms,
        ..BrokerConfig::default()
    }
}

fn start_broker(
    hub: &MemoryHub,
    lease_duration_ms: u64,
    sweep_interval_ms: u64,
) -> (Arc<Broker>, PeerAddress) {
    let transport = Arc::new(hub.open());
    let addr = transport.local_addr();
    let broker = Broker::new(broker_config(lease_duration_ms, sweep_interval_ms), transport);
    tokio::spawn(broker.clone().run());
    (broker, addr)
}

async fn start_node(hub: &MemoryHub, broker: PeerAddress, config: TankConfig) -> TankNode {
    let transport = Arc::new(hub.open());
    let node = TankNode::new(
        transport,
        TankConfig {
            broker_addr: broker.to_string(),
            ..config
        },
    )
    .unwrap();
    node.start().await.unwrap();
    wait_until("node registration", 5_000, || async {
        node.tank_id().await.is_some()
    })
    .await;
    node
}

async fn capture_events(node: &TankNode) -> Arc<Mutex<Vec<TankEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    node.subscribe(Box::new(move |e| sink.lock().unwrap().push(e.clone())))
        .await;
    log
}

fn saw(log: &Arc<Mutex<Vec<TankEvent>>>, wanted: &TankEvent) -> bool {
    log.lock().unwrap().iter().any(|e| e == wanted)
}

async fn wait_until<F, Fut>(what: &str, timeout_ms: u64, mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if cond().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Simulation frozen, token parked: only membership traffic flows.
fn quiet_config() -> TankConfig {
    TankConfig {
        tick_interval_ms: NEVER_MS,
        token_hold_ms: NEVER_MS,
        ..TankConfig::default()
    }
}

#[tokio::test]
async fn token_circulates_the_ring() {
    let hub = MemoryHub::new();
    let (_broker, broker_addr) = start_broker(&hub, 60_000, 60_000);
    let config = TankConfig {
        tick_interval_ms: NEVER_MS,
        token_hold_ms: 25,
        ..TankConfig::default()
    };
    let a = start_node(&hub, broker_addr, config.clone()).await;
    let b = start_node(&hub, broker_addr, config).await;

    // The token started at the first member; it must reach the second,
    // and come back around.
    wait_until("token to reach second node", 5_000, || b.holds_token()).await;
    wait_until("token to return", 5_000, || a.holds_token()).await;
}

#[tokio::test]
async fn token_release_waits_for_late_neighbor_update() {
    let hub = MemoryHub::new();
    // Hand-rolled broker endpoint so the token grant can overtake the
    // adjacency messages, as an unordered transport is allowed to do.
    let broker = hub.open();
    let left_peer = hub.open();
    let node = TankNode::new(
        Arc::new(hub.open()),
        TankConfig {
            broker_addr: broker.local_addr().to_string(),
            tick_interval_ms: NEVER_MS,
            token_hold_ms: 50,
            ..TankConfig::default()
        },
    )
    .unwrap();
    node.start().await.unwrap();

    let (msg, node_addr) = broker.recv().await.unwrap();
    assert_eq!(msg, WireMessage::JoinRequest);
    broker
        .send(
            node_addr,
            WireMessage::JoinResponse(JoinResponse {
                tank_id: TankId::numbered(1),
                lease_duration_ms: 60_000,
            }),
        )
        .await
        .unwrap();
    broker.send(node_addr, WireMessage::Token).await.unwrap();
    wait_until("token receipt", 2_000, || node.holds_token()).await;

    // Several hold intervals pass with no neighbors known; the node must
    // keep the token rather than drop it from the ring.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(node.holds_token().await);

    for direction in [Direction::Left, Direction::Right] {
        broker
            .send(
                node_addr,
                WireMessage::NeighborUpdate(NeighborUpdate {
                    direction,
                    neighbor: left_peer.local_addr(),
                }),
            )
            .await
            .unwrap();
    }

    // Once adjacency lands, the pending release goes out leftward.
    let (msg, from) = tokio::time::timeout(Duration::from_secs(2), left_peer.recv())
        .await
        .expect("token never relinquished")
        .unwrap();
    assert_eq!(msg, WireMessage::Token);
    assert_eq!(from, node_addr);
    assert!(!node.holds_token().await);
}

#[tokio::test]
async fn rejoin_after_eviction_adopts_new_identity() {
    let hub = MemoryHub::new();
    // Sweeps only run when the test forces one.
    let (broker, broker_addr) = start_broker(&hub, 300, NEVER_MS);
    let node = start_node(
        &hub,
        broker_addr,
        TankConfig {
            tick_interval_ms: NEVER_MS,
            token_hold_ms: NEVER_MS,
            ..TankConfig::default()
        },
    )
    .await;
    assert_eq!(node.tank_id().await, Some(TankId::numbered(1)));

    // Evict the node despite its renewals by sweeping far in the future.
    broker
        .sweep_once(Timestamp::new(Timestamp::now().as_millis() + 60_000))
        .await;

    // The renewal loop re-registers; the broker hands out a fresh id and
    // the node must adopt it.
    wait_until("rejoin under new identity", 5_000, || async {
        node.tank_id().await == Some(TankId::numbered(2))
    })
    .await;
    assert_eq!(broker.ring_ids().await, vec![TankId::numbered(2)]);

    // A leave after the rejoin names the current id, so the ring empties.
    node.stop().await;
    wait_until("ring emptied by leave", 2_000, || async {
        broker.ring_ids().await.is_empty()
    })
    .await;
}

#[tokio::test]
async fn snapshot_counts_every_fish_in_the_ring() {
    let hub = MemoryHub::new();
    let (_broker, broker_addr) = start_broker(&hub, 60_000, 60_000);
    let a = start_node(&hub, broker_addr, quiet_config()).await;
    let _b = start_node(&hub, broker_addr, quiet_config()).await;
    let _c = start_node(&hub, broker_addr, quiet_config()).await;
    let events = capture_events(&a).await;

    // Each node spawned one fish on registration. Give the final round of
    // neighbor updates a moment to land before starting the round.
    tokio::time::sleep(Duration::from_millis(200)).await;
    a.initiate_snapshot().await;
    wait_until("snapshot to complete", 5_000, || async {
        saw(&events, &TankEvent::SnapshotComplete { population: 3 })
    })
    .await;

    // A second round from the same initiator works after the reset.
    a.initiate_snapshot().await;
    wait_until("second snapshot", 5_000, || async {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, TankEvent::SnapshotComplete { population: 3 }))
            .count()
            >= 2
    })
    .await;
}

#[tokio::test]
async fn migrated_fish_is_tracked_and_located() {
    let hub = MemoryHub::new();
    let (_broker, broker_addr) = start_broker(&hub, 60_000, 60_000);
    let config = TankConfig {
        tick_interval_ms: 2,
        token_hold_ms: 25,
        ..TankConfig::default()
    };
    let a = start_node(&hub, broker_addr, config.clone()).await;
    let b = start_node(&hub, broker_addr, config).await;
    let a_events = capture_events(&a).await;
    let b_events = capture_events(&b).await;

    // Fish swim and the token circulates, so sooner or later a fish
    // crosses over in one direction or the other.
    let crossed = |log: Arc<Mutex<Vec<TankEvent>>>| {
        log.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, TankEvent::FishHandedOff { .. }))
    };
    wait_until("a handoff", 15_000, || async {
        crossed(a_events.clone()) || crossed(b_events.clone())
    })
    .await;

    // No fish is lost or duplicated by the migrations.
    wait_until("stable population", 5_000, || async {
        a.population().await + b.population().await == 2
    })
    .await;

    // While abroad, the emigrant's home agent learns its current host.
    let (a_addr, b_addr) = (a.local_addr(), b.local_addr());
    let fish_a = FishId::from("fish1@tank1".to_string());
    let fish_b = FishId::from("fish1@tank2".to_string());
    wait_until("home agent update", 10_000, || async {
        a.home_of(&fish_a).await == Some(Some(b_addr))
            || b.home_of(&fish_b).await == Some(Some(a_addr))
    })
    .await;

    // Querying the home tank finds the fish wherever it currently swims:
    // either at home, or at the host its home agent points to. Re-issue
    // the query each round since the fish keeps moving.
    wait_until("fish located", 10_000, || async {
        a.locate_fish(fish_a.clone()).await;
        saw(&a_events, &TankEvent::FishLocated { id: fish_a.clone() })
            || saw(&b_events, &TankEvent::FishLocated { id: fish_a.clone() })
    })
    .await;
}

#[tokio::test]
async fn renewal_keeps_lease_while_silent_peer_expires() {
    let hub = MemoryHub::new();
    let (broker, broker_addr) = start_broker(&hub, 200, 50);

    // A well-behaved node renews; a raw endpoint joins once and goes silent.
    let node = start_node(&hub, broker_addr, quiet_config()).await;
    let silent = hub.open();
    silent
        .send(broker_addr, WireMessage::JoinRequest)
        .await
        .unwrap();
    wait_until("two ring members", 2_000, || async {
        broker.ring_ids().await.len() == 2
    })
    .await;

    // Past several lease periods the silent peer is gone and the renewing
    // node is still in.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let ids = broker.ring_ids().await;
    assert_eq!(ids.len(), 1);
    assert_eq!(Some(&ids[0]), node.tank_id().await.as_ref());
}
