//! The ordered, circular membership registry.
//!
//! Leaf data structure with no protocol logic. Insertion order defines the
//! ring: the neighbor before the first record is the last and vice versa.
//! This type is not synchronized; the [`Broker`](crate::Broker) serializes
//! all access through one reader/writer lock.

use aquaring_types::{PeerAddress, TankId, Timestamp};

/// One registered tank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: TankId,
    pub address: PeerAddress,
    /// Last registration or renewal; the lease is `last_seen + duration`.
    pub last_seen: Timestamp,
}

/// The broker's ring of registered tanks, ordered by join time.
///
/// Invariant: at most one record per address.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<ClientRecord>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Ring position of the record with this identity.
    pub fn index_of_id(&self, id: &TankId) -> Option<usize> {
        self.clients.iter().position(|c| &c.id == id)
    }

    /// Ring position of the record registered for this address.
    pub fn index_of_address(&self, address: PeerAddress) -> Option<usize> {
        self.clients.iter().position(|c| c.address == address)
    }

    /// Insert a new record at the end of the ring.
    ///
    /// The caller must have checked that the address is not yet registered;
    /// idempotent re-registration is expressed with [`touch`](Self::touch).
    pub fn insert(&mut self, id: TankId, address: PeerAddress, now: Timestamp) -> usize {
        debug_assert!(self.index_of_address(address).is_none());
        self.clients.push(ClientRecord {
            id,
            address,
            last_seen: now,
        });
        self.clients.len() - 1
    }

    /// Refresh the lease timestamp of a record.
    pub fn touch(&mut self, index: usize, now: Timestamp) {
        self.clients[index].last_seen = now;
    }

    /// Remove the record at a ring position, returning it.
    pub fn remove_at(&mut self, index: usize) -> ClientRecord {
        self.clients.remove(index)
    }

    pub fn record(&self, index: usize) -> &ClientRecord {
        &self.clients[index]
    }

    /// Address of the left neighbor of the record at `index` (wrap-around).
    /// A ring of one is its own left and right neighbor.
    pub fn left_neighbor_of(&self, index: usize) -> PeerAddress {
        let n = self.clients.len();
        self.clients[(index + n - 1) % n].address
    }

    /// Address of the right neighbor of the record at `index` (wrap-around).
    pub fn right_neighbor_of(&self, index: usize) -> PeerAddress {
        let n = self.clients.len();
        self.clients[(index + 1) % n].address
    }

    /// Resolve a tank identity to its current address.
    pub fn resolve(&self, id: &TankId) -> Option<PeerAddress> {
        self.clients.iter().find(|c| &c.id == id).map(|c| c.address)
    }

    /// Identities of all records whose lease has lapsed.
    pub fn expired_ids(&self, lease_duration_ms: u64, now: Timestamp) -> Vec<TankId> {
        self.clients
            .iter()
            .filter(|c| c.last_seen.has_expired(lease_duration_ms, now))
            .map(|c| c.id.clone())
            .collect()
    }

    /// All identities in ring order.
    pub fn ids(&self) -> Vec<TankId> {
        self.clients.iter().map(|c| c.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new(([127, 0, 0, 1], port).into())
    }

    fn registry_of(n: usize) -> ClientRegistry {
        let mut reg = ClientRegistry::new();
        for i in 0..n {
            reg.insert(
                TankId::numbered(i as u64 + 1),
                addr(1000 + i as u16),
                Timestamp::new(0),
            );
        }
        reg
    }

    #[test]
    fn singleton_is_its_own_neighbor() {
        let reg = registry_of(1);
        assert_eq!(reg.left_neighbor_of(0), addr(1000));
        assert_eq!(reg.right_neighbor_of(0), addr(1000));
    }

    #[test]
    fn neighbors_wrap_around() {
        let reg = registry_of(3);
        assert_eq!(reg.left_neighbor_of(0), addr(1002));
        assert_eq!(reg.right_neighbor_of(0), addr(1001));
        assert_eq!(reg.left_neighbor_of(2), addr(1001));
        assert_eq!(reg.right_neighbor_of(2), addr(1000));
    }

    #[test]
    fn ring_forms_a_single_cycle() {
        // Following right neighbors from any member visits every member
        // exactly once before returning to the start.
        for n in 1..=6 {
            let reg = registry_of(n);
            for start in 0..n {
                let mut seen = vec![false; n];
                let mut idx = start;
                for _ in 0..n {
                    assert!(!seen[idx]);
                    seen[idx] = true;
                    let next_addr = reg.right_neighbor_of(idx);
                    idx = reg.index_of_address(next_addr).unwrap();
                }
                assert_eq!(idx, start);
                assert!(seen.iter().all(|&s| s));
            }
        }
    }

    #[test]
    fn remove_middle_preserves_ring_order() {
        let mut reg = registry_of(3);
        // Ring [A, B, C]: removing B leaves [A, C] with mutual adjacency.
        let b = reg.index_of_id(&TankId::numbered(2)).unwrap();
        reg.remove_at(b);
        assert_eq!(reg.ids(), vec![TankId::numbered(1), TankId::numbered(3)]);
        let a = reg.index_of_id(&TankId::numbered(1)).unwrap();
        assert_eq!(reg.right_neighbor_of(a), addr(1002));
        assert_eq!(reg.left_neighbor_of(a), addr(1002));
    }

    #[test]
    fn resolve_finds_registered_only() {
        let reg = registry_of(2);
        assert_eq!(reg.resolve(&TankId::numbered(2)), Some(addr(1001)));
        assert_eq!(reg.resolve(&TankId::numbered(9)), None);
    }

    #[test]
    fn expiry_scan_is_strict() {
        let mut reg = ClientRegistry::new();
        reg.insert(TankId::numbered(1), addr(1), Timestamp::new(0));
        reg.insert(TankId::numbered(2), addr(2), Timestamp::new(5_000));

        // Lease 10_000ms: at t=10_000 nothing has lapsed, at t=12_000 only
        // the first record has.
        assert!(reg.expired_ids(10_000, Timestamp::new(10_000)).is_empty());
        assert_eq!(
            reg.expired_ids(10_000, Timestamp::new(12_000)),
            vec![TankId::numbered(1)]
        );
    }

    #[test]
    fn touch_refreshes_lease() {
        let mut reg = ClientRegistry::new();
        let idx = reg.insert(TankId::numbered(1), addr(1), Timestamp::new(0));
        reg.touch(idx, Timestamp::new(9_000));
        assert!(reg.expired_ids(10_000, Timestamp::new(12_000)).is_empty());
    }
}
