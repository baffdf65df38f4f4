//! Wire message types for aquaring node-to-node and node-to-broker traffic.
//!
//! Every message exchanged in the system is a variant of [`WireMessage`].
//! Receive loops deserialize incoming frames as `WireMessage` and dispatch
//! with an exhaustive match, so adding a message kind is a compile-time
//! checked change.

use aquaring_types::{Direction, FishModel, PeerAddress, TankId};
use serde::{Deserialize, Serialize};

/// Top-level wire message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Ask the broker for a ring position. Carries no fields; the broker
    /// keys registration on the sender address. Re-sending renews the lease.
    JoinRequest,
    /// Broker reply to a join: assigned identity plus the lease duration.
    JoinResponse(JoinResponse),
    /// Explicit departure from the ring.
    LeaveRequest(LeaveRequest),
    /// Broker-computed adjacency change.
    NeighborUpdate(NeighborUpdate),
    /// Ownership transfer of a fish to a ring neighbor.
    Handoff(Handoff),
    /// The ring mutual-exclusion token. Content-less.
    Token,
    /// Chandy-Lamport snapshot marker. Content-less.
    SnapshotMarker,
    /// Accumulating snapshot sum circulating the ring once per round.
    SnapshotToken(SnapshotToken),
    /// Resolve a tank identity to its current address.
    NameResolutionRequest(NameResolutionRequest),
    /// Broker reply to a name resolution. `address` is `None` when the
    /// tank is unknown (it may have left the ring).
    NameResolutionResponse(NameResolutionResponse),
    /// Ask a peer where a fish is, following its last known hop.
    LocationRequest(LocationRequest),
    /// Report a fish's current host to its home tank.
    LocationUpdate(LocationUpdate),
    /// Secure-transport handshake: the sender's X25519 public key.
    /// Absorbed by the transport layer, never delivered to the protocol.
    KeyExchange(KeyExchange),
    /// Secure-transport ciphertext envelope wrapping an encrypted
    /// `WireMessage`. Absorbed by the transport layer.
    Sealed(Sealed),
}

impl WireMessage {
    /// Whether this message is control-plane traffic that the secure
    /// transport sends unencrypted.
    ///
    /// The whitelist is fixed: membership, adjacency, token, snapshot,
    /// name resolution and handoff messages pass in the clear (as does the
    /// key-exchange handshake itself). Everything else — today the
    /// location-tracking messages — is sealed when the secure transport
    /// is active.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::JoinRequest
                | Self::JoinResponse(_)
                | Self::LeaveRequest(_)
                | Self::NeighborUpdate(_)
                | Self::Handoff(_)
                | Self::Token
                | Self::SnapshotMarker
                | Self::SnapshotToken(_)
                | Self::NameResolutionRequest(_)
                | Self::NameResolutionResponse(_)
                | Self::KeyExchange(_)
        )
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest => "join_request",
            Self::JoinResponse(_) => "join_response",
            Self::LeaveRequest(_) => "leave_request",
            Self::NeighborUpdate(_) => "neighbor_update",
            Self::Handoff(_) => "handoff",
            Self::Token => "token",
            Self::SnapshotMarker => "snapshot_marker",
            Self::SnapshotToken(_) => "snapshot_token",
            Self::NameResolutionRequest(_) => "name_resolution_request",
            Self::NameResolutionResponse(_) => "name_resolution_response",
            Self::LocationRequest(_) => "location_request",
            Self::LocationUpdate(_) => "location_update",
            Self::KeyExchange(_) => "key_exchange",
            Self::Sealed(_) => "sealed",
        }
    }
}

/// Broker reply to a [`WireMessage::JoinRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub tank_id: TankId,
    pub lease_duration_ms: u64,
}

/// Explicit departure from the ring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub tank_id: TankId,
}

/// Adjacency change computed by the broker after a join, leave or expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborUpdate {
    /// Which side of the receiver changes.
    pub direction: Direction,
    /// The new neighbor on that side.
    pub neighbor: PeerAddress,
}

/// Ownership transfer of a fish. The sender has already removed the fish
/// from its local collection when this message is emitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub fish: FishModel,
}

/// Accumulating sum carried around the ring once per snapshot round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotToken {
    pub initiator_id: TankId,
    pub running_sum: u64,
}

/// Resolve a tank identity to its current address. `request_id` is echoed
/// back in the response so the requester can match it to the fish that
/// triggered the lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameResolutionRequest {
    pub tank_id: TankId,
    pub request_id: String,
}

/// Broker reply to a [`NameResolutionRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameResolutionResponse {
    pub request_id: String,
    pub address: Option<PeerAddress>,
}

/// Ask a peer where a fish is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub fish_id: aquaring_types::FishId,
}

/// Report a fish's current host to its home tank's home agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub fish_id: aquaring_types::FishId,
    pub location: PeerAddress,
}

/// X25519 public key announcement for the secure-transport handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchange {
    pub public_key: [u8; 32],
}

/// Ciphertext envelope produced by the secure transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
}
