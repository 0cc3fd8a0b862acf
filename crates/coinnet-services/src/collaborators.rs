//! Interfaces the connection manager consumes but does not own.
//!
//! The manager receives every collaborator as an `Arc<dyn Trait>` at
//! construction. In the daemon these are the in-memory implementations in
//! this crate; tests substitute their own.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use coinnet_core::NetworkAddress;

/// Known peer addresses, scored and ranked elsewhere.
pub trait AddressDatabase: Send + Sync {
    /// Pick a connection candidate.
    ///
    /// `unk_bias` (0..=100) is how strongly to favour addresses never
    /// connected to over ones that worked before. Returns `None` when the
    /// database has nothing to offer.
    fn select(&self, unk_bias: u32) -> Option<NetworkAddress>;

    /// Learn an address. `source` is whoever told us about it.
    fn add(&self, address: NetworkAddress, source: NetworkAddress);

    /// Record that we are dialling `address` now.
    fn on_connection_attempt(&self, address: &NetworkAddress);

    /// Record that an outbound connection to `address` was established.
    fn on_connected(&self, address: &NetworkAddress);
}

pub trait BanList: Send + Sync {
    fn is_address_banned(&self, address: &IpAddr) -> bool;
}

/// Receives key/value status records (e.g. for a UI or the status API).
pub trait StatusSink: Send + Sync {
    fn insert(&self, status: HashMap<String, String>);
}

/// Network-adjusted wall clock in epoch seconds.
pub trait Clock: Send + Sync {
    fn adjusted_time(&self) -> u64;
}

/// Everything the manager calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub addresses: Arc<dyn AddressDatabase>,
    pub bans: Arc<dyn BanList>,
    pub status: Arc<dyn StatusSink>,
    pub clock: Arc<dyn Clock>,
}

/// System time shifted by an offset learned from peers.
#[derive(Debug, Default)]
pub struct SystemClock {
    offset_secs: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offset(&self, offset_secs: i64) {
        self.offset_secs.store(offset_secs, Ordering::Relaxed);
    }

    pub fn offset(&self) -> i64 {
        self.offset_secs.load(Ordering::Relaxed)
    }
}

impl Clock for SystemClock {
    fn adjusted_time(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_add_signed(self.offset())
    }
}
