//! Connection registry: who we are connected to right now.
//!
//! Maps each peer endpoint to a *non-owning* reference to its connection.
//! Keys are canonical: an IPv4-mapped endpoint and its plain IPv4 form are
//! the same peer.
//! Shared between the network tasks and any worker that only needs the peer
//! count (e.g. a miner deciding whether to run), so every access goes through
//! one lock. The lock is never held across an await point and nothing inside
//! it calls back into the registry.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use coinnet_core::{canonical_endpoint, Endpoint};

use crate::connection::PeerConnection;

type Entries = BTreeMap<Endpoint, Weak<dyn PeerConnection>>;

/// Cheap-to-clone handle to the shared registry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<Mutex<Entries>>,
}

/// Exclusive view used when a check and a mutation must happen atomically.
pub struct RegistryGuard<'a> {
    entries: MutexGuard<'a, Entries>,
}

/// What a prune pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// Entries whose connection no longer exists.
    pub released: usize,
    /// Entries whose connection reported an invalid transport and was stopped.
    pub invalid: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            entries: self.entries.lock(),
        }
    }

    /// Insert a weak reference. Returns false if a live connection already
    /// holds the endpoint.
    pub fn insert(&self, endpoint: Endpoint, connection: &Arc<dyn PeerConnection>) -> bool {
        self.lock().insert(endpoint, connection)
    }

    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        self.entries.lock().remove(&canonical_endpoint(endpoint)).is_some()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.lock().contains(endpoint)
    }

    /// Number of entries, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of every entry whose connection still exists.
    pub fn snapshot(&self) -> Vec<(Endpoint, Arc<dyn PeerConnection>)> {
        self.lock().snapshot()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.entries.lock().keys().copied().collect()
    }

    /// Drop released entries; stop and drop entries with an invalid transport.
    pub fn prune(&self) -> PruneReport {
        let mut report = PruneReport::default();
        let mut invalid = Vec::new();

        self.entries.lock().retain(|endpoint, weak| match weak.upgrade() {
            Some(connection) if connection.is_transport_valid() => true,
            Some(connection) => {
                tracing::debug!(peer = %endpoint, "pruning connection with invalid transport");
                invalid.push(connection);
                false
            }
            None => {
                tracing::debug!(peer = %endpoint, "pruning released connection");
                report.released += 1;
                false
            }
        });

        // Stopped outside the lock; stop() may take other locks of its own.
        report.invalid = invalid.len();
        for connection in invalid {
            connection.stop();
        }
        report
    }

    /// Remove every entry, returning the connections that still exist.
    pub fn drain(&self) -> Vec<Arc<dyn PeerConnection>> {
        let entries = std::mem::take(&mut *self.entries.lock());
        entries.into_values().filter_map(|weak| weak.upgrade()).collect()
    }
}

impl RegistryGuard<'_> {
    pub fn insert(&mut self, endpoint: Endpoint, connection: &Arc<dyn PeerConnection>) -> bool {
        match self.entries.entry(canonical_endpoint(&endpoint)) {
            Entry::Occupied(slot) if slot.get().strong_count() > 0 => false,
            Entry::Occupied(mut slot) => {
                slot.insert(Arc::downgrade(connection));
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(connection));
                true
            }
        }
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.entries.contains_key(&canonical_endpoint(endpoint))
    }

    /// The connection under `endpoint`, if it still exists.
    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<dyn PeerConnection>> {
        self.entries
            .get(&canonical_endpoint(endpoint))
            .and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Does a live connection already exist to `address` (any port)?
    pub fn has_address(&self, address: &IpAddr) -> bool {
        let address = address.to_canonical();
        self.entries.iter().any(|(endpoint, weak)| {
            endpoint.ip().to_canonical() == address && weak.strong_count() > 0
        })
    }

    pub fn snapshot(&self) -> Vec<(Endpoint, Arc<dyn PeerConnection>)> {
        self.entries
            .iter()
            .filter_map(|(endpoint, weak)| weak.upgrade().map(|c| (*endpoint, c)))
            .collect()
    }
}
