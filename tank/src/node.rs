//! The running tank node: wires a [`TankModel`] to a transport.
//!
//! Three background tasks drive the model: the receive loop feeds inbound
//! messages in, the tick loop advances the simulation, and the renewal
//! loop re-sends `JoinRequest` to keep the broker lease alive (and retries
//! registration until the first `JoinResponse` lands). Each model call is
//! made under one mutex and its outbox is flushed afterwards, so the state
//! machine never observes interleaved calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use aquaring_messages::WireMessage;
use aquaring_transport::Transport;
use aquaring_types::{FishId, PeerAddress, TankId};
use aquaring_utils::ShutdownController;

use crate::config::TankConfig;
use crate::error::TankError;
use crate::events::TankEvent;
use crate::model::{Outbox, TankModel};

/// Interval between registration retries before the first lease is known.
const REGISTER_RETRY_MS: u64 = 500;

pub struct TankNode {
    model: Arc<Mutex<TankModel>>,
    transport: Arc<dyn Transport>,
    config: TankConfig,
    shutdown: Arc<ShutdownController>,
}

impl TankNode {
    pub fn new(transport: Arc<dyn Transport>, config: TankConfig) -> Result<Self, TankError> {
        let broker_addr: PeerAddress = config
            .broker_addr
            .parse()
            .map_err(|e| TankError::Config(format!("broker_addr: {e}")))?;
        let model = TankModel::new(broker_addr, transport.local_addr(), config.max_fish);
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            transport,
            config,
            shutdown: Arc::new(ShutdownController::new()),
        })
    }

    pub fn local_addr(&self) -> PeerAddress {
        self.transport.local_addr()
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub async fn subscribe(&self, listener: Box<dyn Fn(&TankEvent) + Send + Sync>) {
        self.model.lock().await.subscribe(listener);
    }

    /// Register with the broker and spawn the node's background tasks.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, TankError> {
        let broker = self.model.lock().await.broker_addr();
        self.transport.send(broker, WireMessage::JoinRequest).await?;
        info!(local = %self.local_addr(), broker = %broker, "tank node starting");
        Ok(vec![
            self.spawn_recv_loop(),
            self.spawn_tick_loop(),
            self.spawn_renew_loop(broker),
        ])
    }

    /// Trigger shutdown and announce departure to the broker.
    pub async fn stop(&self) {
        self.shutdown.shutdown();
        let outbox = self.model.lock().await.leave();
        flush(&self.transport, outbox).await;
        info!(local = %self.local_addr(), "tank node stopped");
    }

    pub async fn spawn_fish(&self) {
        self.model.lock().await.spawn_fish();
    }

    pub async fn initiate_snapshot(&self) {
        let outbox = self.model.lock().await.initiate_snapshot();
        flush(&self.transport, outbox).await;
    }

    pub async fn locate_fish(&self, fish_id: FishId) {
        let outbox = self.model.lock().await.locate_fish(fish_id);
        flush(&self.transport, outbox).await;
    }

    pub async fn population(&self) -> usize {
        self.model.lock().await.population()
    }

    pub async fn holds_token(&self) -> bool {
        self.model.lock().await.holds_token()
    }

    pub async fn tank_id(&self) -> Option<TankId> {
        self.model.lock().await.id().cloned()
    }

    pub async fn home_of(&self, fish_id: &FishId) -> Option<Option<PeerAddress>> {
        self.model.lock().await.home_of(fish_id)
    }

    fn spawn_recv_loop(&self) -> JoinHandle<()> {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let token_hold_ms = self.config.token_hold_ms;
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = transport.recv() => match received {
                        Ok((msg, from)) => {
                            let got_token = matches!(msg, WireMessage::Token);
                            let outbox = model.lock().await.handle_message(from, msg);
                            flush(&transport, outbox).await;
                            if got_token {
                                schedule_token_release(
                                    model.clone(),
                                    transport.clone(),
                                    token_hold_ms,
                                );
                            }
                        }
                        Err(e) => {
                            warn!("transport closed: {e}");
                            break;
                        }
                    },
                }
            }
        })
    }

    fn spawn_tick_loop(&self) -> JoinHandle<()> {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        let outbox = model.lock().await.tick();
                        flush(&transport, outbox).await;
                    }
                }
            }
        })
    }

    /// Re-send `JoinRequest` at half the lease interval; before the first
    /// response arrives this doubles as a registration retry.
    fn spawn_renew_loop(&self, broker: PeerAddress) -> JoinHandle<()> {
        let model = self.model.clone();
        let transport = self.transport.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let lease = model.lock().await.lease_duration_ms();
                let wait_ms = if lease == 0 {
                    REGISTER_RETRY_MS
                } else {
                    (lease / 2).max(1)
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {
                        if let Err(e) = transport.send(broker, WireMessage::JoinRequest).await {
                            warn!("lease renewal failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

/// Hold the token for the configured interval, then pass it on.
///
/// The broker's token grant can overtake its adjacency messages on an
/// unordered transport, so the left neighbor may not be known yet when the
/// hold expires. The release is retried each hold interval until it goes
/// out (or the token was lost some other way), never silently abandoned.
fn schedule_token_release(
    model: Arc<Mutex<TankModel>>,
    transport: Arc<dyn Transport>,
    hold_ms: u64,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(hold_ms)).await;
            let (outbox, no_neighbor_yet) = {
                let mut model = model.lock().await;
                let outbox = model.release_token();
                let no_neighbor_yet = outbox.is_empty() && model.holds_token();
                (outbox, no_neighbor_yet)
            };
            if no_neighbor_yet {
                continue;
            }
            flush(&transport, outbox).await;
            break;
        }
    });
}

async fn flush(transport: &Arc<dyn Transport>, outbox: Outbox) {
    for (to, msg) in outbox {
        if let Err(e) = transport.send(to, msg).await {
            warn!(to = %to, "send failed: {e}");
        }
    }
}
