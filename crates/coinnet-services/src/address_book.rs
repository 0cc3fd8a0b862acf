//! In-memory address database.
//!
//! Addresses live in one of two buckets: "new" (never connected) and
//! "tried" (connected at least once). `select` splits between the buckets
//! according to the caller's bias, then picks inside the bucket weighted
//! against recently and repeatedly failed addresses.

use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;

use coinnet_core::{Endpoint, NetworkAddress};

use crate::collaborators::{AddressDatabase, Clock};

/// Seconds within which a previous attempt heavily discounts a candidate.
const RECENT_ATTEMPT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub address: NetworkAddress,
    pub source: NetworkAddress,
    /// Failed or pending attempts since the last success.
    pub attempts: u32,
    /// Last successful outbound connection, epoch seconds. 0 = never.
    pub last_success: u64,
}

impl AddressEntry {
    /// Relative selection weight, in (0, 1].
    fn chance(&self, now: u64) -> f64 {
        let mut chance = 1.0;
        if now.saturating_sub(self.address.last_try) < RECENT_ATTEMPT_SECS {
            chance *= 0.01;
        }
        chance * 0.66f64.powi(self.attempts.min(8) as i32)
    }
}

#[derive(Clone)]
pub struct AddressBook {
    entries: Arc<DashMap<Endpoint, AddressEntry>>,
    clock: Arc<dyn Clock>,
}

impl AddressBook {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<AddressEntry> {
        self.entries.get(endpoint).map(|e| e.value().clone())
    }

    /// (new, tried) bucket sizes.
    pub fn counts(&self) -> (usize, usize) {
        let tried = self
            .entries
            .iter()
            .filter(|e| e.value().last_success > 0)
            .count();
        (self.entries.len() - tried, tried)
    }

    fn pick(bucket: &[AddressEntry], now: u64) -> Option<NetworkAddress> {
        let mut rng = rand::thread_rng();
        bucket
            .choose_weighted(&mut rng, |e| e.chance(now))
            .ok()
            .or_else(|| bucket.choose(&mut rng))
            .map(|e| e.address.clone())
    }
}

impl AddressDatabase for AddressBook {
    fn select(&self, unk_bias: u32) -> Option<NetworkAddress> {
        let (tried, new): (Vec<AddressEntry>, Vec<AddressEntry>) = self
            .entries
            .iter()
            .map(|e| e.value().clone())
            .partition(|e| e.last_success > 0);

        let use_tried = match (tried.is_empty(), new.is_empty()) {
            (true, true) => return None,
            (false, true) => true,
            (true, false) => false,
            (false, false) => {
                let bias = f64::from(unk_bias.min(100));
                let cor_tried = (tried.len() as f64).sqrt() * (100.0 - bias);
                let cor_new = (new.len() as f64).sqrt() * bias;
                rand::thread_rng().gen::<f64>() * (cor_tried + cor_new) < cor_tried
            }
        };

        let now = self.clock.adjusted_time();
        Self::pick(if use_tried { &tried } else { &new }, now)
    }

    fn add(&self, mut address: NetworkAddress, source: NetworkAddress) {
        if !address.is_valid() {
            tracing::debug!(%address, "ignoring invalid address");
            return;
        }
        let now = self.clock.adjusted_time();
        if address.timestamp == 0 || address.timestamp > now {
            address.timestamp = now;
        }
        let endpoint = address.endpoint();
        let seen = address.timestamp;
        self.entries
            .entry(endpoint)
            .and_modify(|e| e.address.timestamp = e.address.timestamp.max(seen))
            .or_insert_with(|| {
                tracing::debug!(%address, %source, "new address");
                AddressEntry {
                    address,
                    source,
                    attempts: 0,
                    last_success: 0,
                }
            });
    }

    fn on_connection_attempt(&self, address: &NetworkAddress) {
        let now = self.clock.adjusted_time();
        let mut entry = self
            .entries
            .entry(address.endpoint())
            .or_insert_with(|| AddressEntry {
                address: address.clone(),
                source: address.clone(),
                attempts: 0,
                last_success: 0,
            });
        entry.address.last_try = now;
        entry.attempts = entry.attempts.saturating_add(1);
    }

    fn on_connected(&self, address: &NetworkAddress) {
        let now = self.clock.adjusted_time();
        if let Some(mut entry) = self.entries.get_mut(&address.endpoint()) {
            entry.last_success = now;
            entry.attempts = 0;
            entry.address.timestamp = now;
        }
    }
}
