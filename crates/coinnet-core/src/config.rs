//! Configuration system for coinnet.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $COINNET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/coinnet/config.toml
//!   3. ~/.config/coinnet/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port for peer connections.
pub const DEFAULT_TCP_PORT: u16 = 32809;

/// Default cap on registry size enforced by the accept path.
pub const TCP_INBOUND_MAXIMUM: usize = 64;

/// Floor for a configured inbound maximum.
pub const TCP_INBOUND_MINIMUM: usize = 8;

/// Default number of peers the maintenance loop tries to keep.
pub const MINIMUM_TCP_CONNECTIONS: usize = 8;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinnetConfig {
    pub network: NetworkConfig,
    pub peers: PeersConfig,
    pub bans: BansConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the peer listener binds to.
    pub listen_addr: String,
    /// TCP port for inbound peers. 0 = OS-assigned.
    pub tcp_port: u16,
    /// Inbound connections are refused once the registry holds this many peers.
    /// Values below TCP_INBOUND_MINIMUM are raised to it.
    pub inbound_maximum: usize,
    /// Bootstrap nodes as "host:port".
    pub bootstrap_nodes: Vec<String>,
    /// Local HTTP API port.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// Minimum outbound peer count.
    pub minimum_outbound: usize,
    /// Peer count the maintenance loop converges to. 0 = minimum_outbound.
    pub outbound_target: usize,
    /// Delay before the first maintenance tick.
    pub warmup_secs: u64,
    /// Interval between maintenance ticks.
    pub tick_interval_secs: u64,
    /// An address tried more recently than this is not dialled again.
    pub retry_backoff_secs: u64,
    /// Outbound connect timeout.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BansConfig {
    /// Where ban entries are persisted. Empty = in memory only.
    pub persist_path: PathBuf,
    /// Ban length applied by the API when none is given.
    pub default_ban_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            inbound_maximum: TCP_INBOUND_MAXIMUM,
            bootstrap_nodes: Vec::new(),
            api_port: 9101,
        }
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            minimum_outbound: MINIMUM_TCP_CONNECTIONS,
            outbound_target: 0,
            warmup_secs: 1,
            tick_interval_secs: 8,
            retry_backoff_secs: 600,
            connect_timeout_secs: 8,
        }
    }
}

impl Default for BansConfig {
    fn default() -> Self {
        Self {
            persist_path: data_dir().join("bans.json"),
            default_ban_secs: 24 * 60 * 60,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// Inbound maximum with the floor applied.
    pub fn effective_inbound_maximum(&self) -> usize {
        self.inbound_maximum.max(TCP_INBOUND_MINIMUM)
    }

    /// Parse `bootstrap_nodes` into (host, port) pairs. Malformed entries are skipped.
    pub fn bootstrap_pairs(&self) -> Vec<(String, u16)> {
        self.bootstrap_nodes
            .iter()
            .filter_map(|entry| parse_host_port(entry))
            .collect()
    }
}

impl PeersConfig {
    pub fn effective_outbound_target(&self) -> usize {
        if self.outbound_target == 0 {
            self.minimum_outbound
        } else {
            self.outbound_target
        }
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Split "host:port", accepting bracketed IPv6 hosts ("[::1]:9000").
pub fn parse_host_port(entry: &str) -> Option<(String, u16)> {
    let (host, port) = entry.trim().rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("coinnet")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("coinnet")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CoinnetConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            CoinnetConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("COINNET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CoinnetConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply COINNET_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COINNET_NETWORK__TCP_PORT") {
            if let Ok(p) = v.parse() {
                self.network.tcp_port = p;
            }
        }
        if let Ok(v) = std::env::var("COINNET_NETWORK__INBOUND_MAXIMUM") {
            if let Ok(n) = v.parse() {
                self.network.inbound_maximum = n;
            }
        }
        if let Ok(v) = std::env::var("COINNET_NETWORK__BOOTSTRAP_NODES") {
            self.network.bootstrap_nodes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("COINNET_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Ok(v) = std::env::var("COINNET_PEERS__MINIMUM_OUTBOUND") {
            if let Ok(n) = v.parse() {
                self.peers.minimum_outbound = n;
            }
        }
        if let Ok(v) = std::env::var("COINNET_PEERS__OUTBOUND_TARGET") {
            if let Ok(n) = v.parse() {
                self.peers.outbound_target = n;
            }
        }
    }
}
