//! Peer registry: one entry per source address, learned from beacons.

use parking_lot::Mutex;
use tracing::debug;

use crate::flags::Descriptor;
use crate::frame::Beacon;
use crate::timestamp::{Timestamp, TimestampKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: String,
    /// Kilobytes free as last advertised; 0 when unknown.
    pub freespace: u64,
    pub eid: String,
    pub max_descriptor: Descriptor,
    pub created: Timestamp,
    pub updated: Timestamp,
}

/// Outcome of [`PeerTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Peers never leave the table; eviction is up to the host.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Mutex<Vec<Peer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a beacon from `address`, creating the peer the first time.
    pub fn upsert(&self, address: &str, beacon: &Beacon) -> Upsert {
        let now = Timestamp::now(TimestampKind::Posix64_32);
        let freespace = beacon.freespace().unwrap_or(0);
        let mut peers = self.peers.lock();
        if let Some(peer) = peers.iter_mut().find(|p| p.address == address) {
            peer.freespace = freespace;
            peer.eid = beacon.eid().to_string();
            peer.max_descriptor = beacon.descriptor();
            peer.updated = now;
            debug!(peer = address, eid = beacon.eid(), "peer updated");
            return Upsert::Updated;
        }
        peers.push(Peer {
            address: address.to_string(),
            freespace,
            eid: beacon.eid().to_string(),
            max_descriptor: beacon.descriptor(),
            created: now,
            updated: now,
        });
        debug!(peer = address, eid = beacon.eid(), "peer created");
        Upsert::Created
    }

    pub fn get(&self, address: &str) -> Option<Peer> {
        self.peers.lock().iter().find(|p| p.address == address).cloned()
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{FrameType, Header};
    use std::sync::Arc;

    fn beacon(freespace: Option<u64>, eid: &str) -> Beacon {
        let opts = if freespace.is_some() {
            "descriptor=d32,freespace=yes,freespaced=d32"
        } else {
            "descriptor=d32"
        };
        let header = Header::parse_options(FrameType::Beacon, opts).unwrap();
        Beacon::from_header(header, freespace).unwrap().with_eid(eid)
    }

    #[test]
    fn new_address_adds_one() {
        let table = PeerTable::new();
        assert!(table.is_empty());
        assert_eq!(table.upsert("10.0.0.1", &beacon(Some(500), "a-1")), Upsert::Created);
        assert_eq!(table.upsert("10.0.0.2", &beacon(None, "b-2")), Upsert::Created);
        assert_eq!(table.len(), 2);
        let b = table.get("10.0.0.2").unwrap();
        assert_eq!(b.freespace, 0);
        assert_eq!(b.max_descriptor, Descriptor::D32);
    }

    #[test]
    fn same_address_updates_in_place() {
        let table = PeerTable::new();
        table.upsert("10.0.0.1", &beacon(Some(500), "a-1"));
        let first = table.get("10.0.0.1").unwrap();
        assert_eq!(table.upsert("10.0.0.1", &beacon(Some(900), "a-2")), Upsert::Updated);
        assert_eq!(table.len(), 1);
        let peer = table.get("10.0.0.1").unwrap();
        assert_eq!(peer.freespace, 900);
        assert_eq!(peer.eid, "a-2");
        assert_eq!(peer.created, first.created);
        assert!(table.get("10.0.0.9").is_none());
    }

    #[test]
    fn concurrent_upserts() {
        let table = Arc::new(PeerTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        table.upsert(&format!("10.0.0.{}", i % 4), &beacon(Some(round), "x"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 4);
        assert_eq!(table.snapshot().len(), 4);
    }
}
