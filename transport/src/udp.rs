//! UDP transport — one bincode frame per datagram.

use aquaring_messages::WireMessage;
use aquaring_types::PeerAddress;
use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::{Transport, TransportError};

/// Maximum accepted datagram size. A wire message is a handful of small
/// fields; anything larger than this is not ours.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// UDP-backed [`Transport`]. Datagram loss and reordering map directly onto
/// the unreliable-transport contract, so no retransmission layer is needed.
pub struct UdpTransport {
    socket: UdpSocket,
    local: PeerAddress,
}

impl UdpTransport {
    /// Bind a UDP socket on the given address.
    pub async fn bind(addr: PeerAddress) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr.socket_addr()).await?;
        let local = PeerAddress::new(socket.local_addr()?);
        tracing::debug!(%local, "udp transport bound");
        Ok(Self { socket, local })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> PeerAddress {
        self.local
    }

    async fn send(&self, to: PeerAddress, msg: WireMessage) -> Result<(), TransportError> {
        let bytes =
            bincode::serialize(&msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        // Fire-and-forget: a partial or failed send is logged, not retried.
        if let Err(e) = self.socket.send_to(&bytes, to.socket_addr()).await {
            tracing::warn!(%to, kind = msg.kind(), "udp send failed: {e}");
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(WireMessage, PeerAddress), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, sender) = self.socket.recv_from(&mut buf).await?;
            match bincode::deserialize::<WireMessage>(&buf[..len]) {
                Ok(msg) => return Ok((msg, PeerAddress::new(sender))),
                Err(e) => {
                    // Undecodable datagrams are dropped; the protocol
                    // tolerates loss, not corruption.
                    tracing::warn!(%sender, "dropping undecodable datagram: {e}");
                }
            }
        }
    }
}
