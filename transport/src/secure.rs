//! Transparent link encryption over any [`Transport`].
//!
//! The first time two peers exchange non-control traffic their X25519
//! public keys are exchanged automatically via [`WireMessage::KeyExchange`]
//! frames. From the Diffie-Hellman shared secret a symmetric session key is
//! derived (BLAKE2b over the shared secret plus a context string) and used
//! to seal payloads with ChaCha20-Poly1305. Handshake frames are absorbed
//! here and never reach the protocol layer.
//!
//! Control-plane messages ([`WireMessage::is_control`]) pass through
//! unencrypted; outbound application messages for a peer whose key is not
//! yet known are queued until the handshake completes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use aquaring_messages::{KeyExchange, Sealed, WireMessage};
use aquaring_types::PeerAddress;
use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::{Transport, TransportError};

type Blake2b256 = Blake2b<U32>;

/// Domain separator mixed into the session-key derivation.
const KEY_CONTEXT: &[u8] = b"aquaring-transport-v1";
/// AEAD nonce length.
const NONCE_LEN: usize = 12;

/// Derive the symmetric session key from the DH shared secret.
fn derive_session_key(shared: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(shared);
    hasher.update(KEY_CONTEXT);
    let result = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// A drop-in [`Transport`] wrapper that transparently secures all
/// non-control traffic.
pub struct SecureTransport<T> {
    inner: T,
    secret: StaticSecret,
    public: X25519Public,
    /// Per-peer session keys, established by the key exchange.
    sessions: Mutex<HashMap<PeerAddress, [u8; 32]>>,
    /// Outbound messages parked until the peer's key is known.
    pending: Mutex<HashMap<PeerAddress, Vec<WireMessage>>>,
    /// Peers we have already announced our key to (idempotent handshake).
    key_sent: Mutex<HashSet<PeerAddress>>,
}

impl<T: Transport> SecureTransport<T> {
    /// Wrap a transport with a freshly generated X25519 key pair.
    pub fn new(inner: T) -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = X25519Public::from(&secret);
        Self {
            inner,
            secret,
            public,
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            key_sent: Mutex::new(HashSet::new()),
        }
    }

    fn session_key(&self, peer: PeerAddress) -> Option<[u8; 32]> {
        self.sessions.lock().expect("lock poisoned").get(&peer).copied()
    }

    /// Seal a message for a peer whose session key is known.
    fn seal(&self, key: &[u8; 32], msg: &WireMessage) -> Result<Sealed, TransportError> {
        let plaintext =
            bincode::serialize(msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        let cipher = ChaCha20Poly1305::new_from_slice(key).expect("valid key length");
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from(nonce_bytes);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| TransportError::Encode("aead encryption failed".into()))?;

        // Envelope layout: nonce || ciphertext.
        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(Sealed {
            ciphertext: envelope,
        })
    }

    fn open(&self, key: &[u8; 32], sealed: &Sealed) -> Result<WireMessage, TransportError> {
        if sealed.ciphertext.len() < NONCE_LEN {
            return Err(TransportError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = sealed.ciphertext.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new_from_slice(key).expect("valid key length");
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TransportError::Decrypt)?;
        bincode::deserialize(&plaintext).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Announce our public key to a peer, once.
    async fn initiate_key_exchange(&self, peer: PeerAddress) -> Result<(), TransportError> {
        let first = self.key_sent.lock().expect("lock poisoned").insert(peer);
        if first {
            let announce = WireMessage::KeyExchange(KeyExchange {
                public_key: self.public.to_bytes(),
            });
            self.inner.send(peer, announce).await?;
        }
        Ok(())
    }

    /// Learn a peer's key, reply with ours if needed, and flush any
    /// messages that were parked waiting for the handshake.
    async fn handle_key_exchange(
        &self,
        sender: PeerAddress,
        msg: KeyExchange,
    ) -> Result<(), TransportError> {
        let their_pub = X25519Public::from(msg.public_key);
        let shared = self.secret.diffie_hellman(&their_pub);
        let key = derive_session_key(shared.as_bytes());
        self.sessions
            .lock()
            .expect("lock poisoned")
            .insert(sender, key);
        tracing::debug!(peer = %sender, "secure session established");

        self.initiate_key_exchange(sender).await?;

        let parked = self
            .pending
            .lock()
            .expect("lock poisoned")
            .remove(&sender)
            .unwrap_or_default();
        for queued in parked {
            let sealed = self.seal(&key, &queued)?;
            self.inner.send(sender, WireMessage::Sealed(sealed)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for SecureTransport<T> {
    fn local_addr(&self) -> PeerAddress {
        self.inner.local_addr()
    }

    async fn send(&self, to: PeerAddress, msg: WireMessage) -> Result<(), TransportError> {
        if msg.is_control() {
            return self.inner.send(to, msg).await;
        }

        match self.session_key(to) {
            Some(key) => {
                let sealed = self.seal(&key, &msg)?;
                self.inner.send(to, WireMessage::Sealed(sealed)).await
            }
            None => {
                self.pending
                    .lock()
                    .expect("lock poisoned")
                    .entry(to)
                    .or_default()
                    .push(msg);
                self.initiate_key_exchange(to).await
            }
        }
    }

    async fn recv(&self) -> Result<(WireMessage, PeerAddress), TransportError> {
        loop {
            let (msg, sender) = self.inner.recv().await?;
            match msg {
                WireMessage::KeyExchange(kx) => {
                    self.handle_key_exchange(sender, kx).await?;
                }
                WireMessage::Sealed(sealed) => match self.session_key(sender) {
                    Some(key) => match self.open(&key, &sealed) {
                        Ok(inner) => return Ok((inner, sender)),
                        Err(e) => {
                            tracing::warn!(peer = %sender, "dropping sealed frame: {e}");
                        }
                    },
                    None => {
                        tracing::warn!(
                            peer = %sender,
                            "sealed frame before key exchange, dropping"
                        );
                    }
                },
                plain => return Ok((plain, sender)),
            }
        }
    }
}
