//! Ban table: addresses we refuse to talk to, in either direction.
//!
//! Bans expire against the shared network-adjusted [`Clock`]. When constructed with a `persist_path`, entries are written
//! to disk on every mutation and reloaded on startup so bans survive a
//! daemon restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use dashmap::DashMap;

use crate::collaborators::{BanList, Clock};

/// Registry of banned addresses, keyed by canonical IP.
#[derive(Clone)]
pub struct BanTable {
    /// Map: address -> ban expiry, epoch seconds.
    bans: Arc<DashMap<IpAddr, u64>>,
    persist_path: Arc<Option<PathBuf>>,
    clock: Arc<dyn Clock>,
}

impl BanTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            bans: Arc::new(DashMap::new()),
            persist_path: Arc::new(None),
            clock,
        }
    }

    /// Create a table that persists bans to the given file path.
    /// Loads existing bans from disk if the file exists.
    pub fn with_persistence(path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        let table = Self {
            bans: Arc::new(DashMap::new()),
            persist_path: Arc::new(Some(path)),
            clock,
        };
        table.load_from_disk();
        table
    }

    /// Ban `address` for `duration_secs` from now. Returns the expiry.
    pub fn ban(&self, address: IpAddr, duration_secs: u64) -> u64 {
        let until = self.clock.adjusted_time().saturating_add(duration_secs);
        self.ban_until(address, until);
        until
    }

    pub fn ban_until(&self, address: IpAddr, until: u64) {
        self.bans.insert(address.to_canonical(), until);
        self.save_to_disk();
        tracing::info!(%address, until, "address banned");
    }

    pub fn unban(&self, address: &IpAddr) -> bool {
        let removed = self.bans.remove(&address.to_canonical()).is_some();
        if removed {
            self.save_to_disk();
            tracing::info!(%address, "address unbanned");
        }
        removed
    }

    /// Active bans as (address, expiry).
    pub fn list(&self) -> Vec<(IpAddr, u64)> {
        let now = self.clock.adjusted_time();
        let mut bans: Vec<_> = self
            .bans
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        bans.sort();
        bans
    }

    /// Drop expired bans. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.adjusted_time();
        let before = self.bans.len();
        self.bans.retain(|_, until| *until > now);
        let removed = before - self.bans.len();
        if removed > 0 {
            self.save_to_disk();
            tracing::debug!(removed, "expired bans swept");
        }
        removed
    }
}

impl BanList for BanTable {
    fn is_address_banned(&self, address: &IpAddr) -> bool {
        self.bans
            .get(&address.to_canonical())
            .map(|until| *until.value() > self.clock.adjusted_time())
            .unwrap_or(false)
    }
}

impl BanTable {
    /// Serialize all bans to disk as JSON. Best-effort, logs on failure.
    fn save_to_disk(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let snapshot: HashMap<String, u64> = self
            .bans
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(error = %e, path = %path.display(), "failed to persist bans");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize bans");
            }
        }
    }

    /// Load bans from disk. Called once during construction.
    fn load_from_disk(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read bans");
                return;
            }
        };
        let map: HashMap<String, u64> = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to parse bans");
                return;
            }
        };
        let now = self.clock.adjusted_time();
        let mut loaded = 0usize;
        for (address, until) in map {
            match address.parse::<IpAddr>() {
                Ok(ip) if until > now => {
                    self.bans.insert(ip.to_canonical(), until);
                    loaded += 1;
                }
                Ok(_) => {}
                Err(_) => tracing::warn!(address, "skipping malformed ban entry"),
            }
        }
        tracing::info!(loaded, path = %path.display(), "loaded bans from disk");
    }
}
