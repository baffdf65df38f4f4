//! Point-to-point message transport for the aquaring protocol.
//!
//! The protocol crates only ever see the [`Transport`] trait: unordered,
//! best-effort send of typed messages plus a blocking receive. Messages may
//! be lost or delayed, never corrupted. Three implementations live here:
//!
//! - [`UdpTransport`] — one bincode frame per UDP datagram, the deployment
//!   transport.
//! - [`MemoryTransport`] — an in-process loopback network for tests and
//!   single-process simulations.
//! - [`SecureTransport`] — a transparent wrapper over any transport that
//!   performs a one-time per-peer key handshake and seals non-control
//!   payloads; the protocol layer cannot tell whether it is present.

pub mod error;
pub mod memory;
pub mod secure;
pub mod udp;

use aquaring_messages::WireMessage;
use aquaring_types::PeerAddress;
use async_trait::async_trait;

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryTransport};
pub use secure::SecureTransport;
pub use udp::UdpTransport;

/// Unreliable point-to-point message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The address peers should use to reach this endpoint.
    fn local_addr(&self) -> PeerAddress;

    /// Fire-and-forget send. A send that reaches the wire successfully may
    /// still be lost in transit; callers never retry.
    async fn send(&self, to: PeerAddress, msg: WireMessage) -> Result<(), TransportError>;

    /// Suspend until the next message arrives, returning it together with
    /// the sender's address.
    async fn recv(&self) -> Result<(WireMessage, PeerAddress), TransportError>;
}
