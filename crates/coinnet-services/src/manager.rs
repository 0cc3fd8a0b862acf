//! Connection manager: admission control and peer-set maintenance.
//!
//! Inbound sockets go through [`ConnectionManager::handle_accept`], outbound
//! dials through [`ConnectionManager::connect`]. Both check and mutate the
//! registry under one lock so concurrent admissions cannot race past the
//! duplicate, ban or capacity rules.
//!
//! Once started, a maintenance task runs [`ConnectionManager::tick`] on a
//! fixed interval: prune dead connections, top the outbound set up toward
//! the target while keeping at most one peer per network group, then post a
//! status record.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use coinnet_core::{canonical_endpoint, group_of, CoinnetConfig, Endpoint, NetworkAddress, NetworkGroup};

use crate::collaborators::Collaborators;
use crate::connection::{ConnectionFactory, InboundTransport};
use crate::registry::ConnectionRegistry;
use crate::resolver::{resolve_bootstrap, HostResolver, TokioResolver, LOOKUP_TIMEOUT};

/// Floor for the maintenance period; a zero period cannot be scheduled.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Runtime knobs, usually derived from [`CoinnetConfig`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Registry size at which inbound connections are refused.
    pub inbound_maximum: usize,
    /// Peer count the maintenance loop tops up to.
    pub outbound_target: usize,
    pub bootstrap: Vec<(String, u16)>,
    pub warmup: Duration,
    pub tick_interval: Duration,
    /// Candidates tried more recently than this are skipped.
    pub retry_backoff_secs: u64,
    pub lookup_timeout: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &CoinnetConfig) -> Self {
        Self {
            inbound_maximum: config.network.effective_inbound_maximum(),
            outbound_target: config.peers.effective_outbound_target(),
            bootstrap: config.network.bootstrap_pairs(),
            warmup: config.peers.warmup(),
            tick_interval: config.peers.tick_interval(),
            retry_backoff_secs: config.peers.retry_backoff_secs,
            lookup_timeout: LOOKUP_TIMEOUT,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&CoinnetConfig::default())
    }
}

/// Why an inbound connection was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Already connected to this address.
    Duplicate,
    Banned,
    /// Registry at the inbound maximum.
    Capacity,
    /// Peer address could not be read from the socket.
    NoRemote,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Duplicate => write!(f, "duplicate"),
            RejectReason::Banned => write!(f, "banned"),
            RejectReason::Capacity => write!(f, "capacity"),
            RejectReason::NoRemote => write!(f, "no remote endpoint"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(RejectReason),
}

pub struct ConnectionManager<F: ConnectionFactory> {
    factory: F,
    collaborators: Collaborators,
    settings: ManagerSettings,
    registry: ConnectionRegistry,
    resolver: Arc<dyn HostResolver>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> ConnectionManager<F> {
    pub fn new(factory: F, collaborators: Collaborators, settings: ManagerSettings) -> Self {
        Self {
            factory,
            collaborators,
            settings,
            registry: ConnectionRegistry::new(),
            resolver: Arc::new(TokioResolver),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Replace the system resolver used for bootstrap nodes.
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Shared handle to the registry, for status readers and the API.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Whether any peer is connected. Workers such as a miner gate on this.
    pub fn is_connected(&self) -> bool {
        !self.registry.snapshot().is_empty()
    }

    /// Admit or reject a freshly accepted inbound transport.
    pub fn handle_accept(&self, transport: F::Transport) -> Admission {
        let Some(remote) = transport.remote_endpoint() else {
            tracing::warn!("rejecting inbound connection without readable peer address");
            transport.close();
            return Admission::Rejected(RejectReason::NoRemote);
        };
        let remote = canonical_endpoint(&remote);
        let ip = remote.ip();

        let mut registry = self.registry.lock();
        let verdict = if registry.has_address(&ip) {
            Some(RejectReason::Duplicate)
        } else if self.collaborators.bans.is_address_banned(&ip) {
            Some(RejectReason::Banned)
        } else if registry.len() >= self.settings.inbound_maximum {
            Some(RejectReason::Capacity)
        } else {
            None
        };

        if let Some(reason) = verdict {
            let size = registry.len();
            drop(registry);
            match reason {
                RejectReason::Banned => {
                    tracing::warn!(peer = %remote, %reason, "inbound connection rejected")
                }
                _ => tracing::info!(peer = %remote, %reason, size, "inbound connection rejected"),
            }
            transport.close();
            return Admission::Rejected(reason);
        }

        let connection = self.factory.incoming(transport);
        registry.insert(remote, &connection);
        let size = registry.len();
        drop(registry);

        tracing::info!(peer = %remote, size, "inbound connection accepted");
        connection.start();
        Admission::Accepted
    }

    /// Dial `endpoint` unless it is banned or already connected.
    /// Returns whether a connection attempt was started.
    pub fn connect(&self, endpoint: Endpoint) -> bool {
        let endpoint = canonical_endpoint(&endpoint);
        if self.collaborators.bans.is_address_banned(&endpoint.ip()) {
            tracing::info!(peer = %endpoint, "not connecting to banned address");
            return false;
        }

        let connection = {
            let mut registry = self.registry.lock();
            if registry.get(&endpoint).is_some() {
                tracing::debug!(peer = %endpoint, "already connected");
                return false;
            }
            let connection = self.factory.outgoing();
            registry.insert(endpoint, &connection);
            connection
        };

        self.collaborators
            .addresses
            .on_connection_attempt(&NetworkAddress::from_endpoint(&endpoint));
        tracing::debug!(peer = %endpoint, "connecting");
        connection.start_outbound(endpoint);
        true
    }

    /// Send `payload` to every live peer. Returns how many accepted it.
    pub fn broadcast(&self, payload: Bytes) -> usize {
        let mut delivered = 0;
        for (endpoint, connection) in self.registry.snapshot() {
            match connection.send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(peer = %endpoint, error = %e, "broadcast send failed"),
            }
        }
        delivered
    }

    /// One maintenance pass.
    pub fn tick(&self) {
        let pruned = self.registry.prune();
        if pruned.released + pruned.invalid > 0 {
            tracing::debug!(
                released = pruned.released,
                invalid = pruned.invalid,
                remaining = self.registry.len(),
                "pruned connections"
            );
        }
        self.top_up();
        self.report_status();
    }

    fn top_up(&self) {
        let target = self.settings.outbound_target;
        let size = self.registry.len();
        if size >= target {
            return;
        }

        let mut groups: HashSet<NetworkGroup> = self
            .registry
            .snapshot()
            .iter()
            .map(|(endpoint, _)| group_of(&endpoint.ip()))
            .collect();
        let now = self.collaborators.clock.adjusted_time();
        let budget = target - size;
        tracing::debug!(size, target, budget, "topping up outbound peers");

        for _ in 0..budget {
            let size = self.registry.len();
            if size >= target {
                break;
            }

            let bias = 10 + size.min(8) as u32 * 10;
            let Some(candidate) = self.collaborators.addresses.select(bias) else {
                tracing::trace!(bias, "no candidate available");
                continue;
            };

            if !candidate.is_valid() || candidate.is_local() {
                tracing::trace!(%candidate, "skipping unroutable candidate");
                continue;
            }
            let group = candidate.group();
            if groups.contains(&group) {
                tracing::trace!(%candidate, %group, "skipping candidate in connected group");
                continue;
            }
            if now.saturating_sub(candidate.last_try) < self.settings.retry_backoff_secs {
                tracing::trace!(%candidate, last_try = candidate.last_try, "candidate tried recently");
                continue;
            }

            let endpoint = candidate.endpoint();
            if self.connect(endpoint) {
                tracing::info!(peer = %endpoint, %group, "opened outbound connection");
                groups.insert(group);
            } else {
                tracing::debug!(peer = %endpoint, "candidate not dialled");
            }
        }
    }

    fn report_status(&self) {
        let size = self.registry.len();
        let value = if size > 0 { "Connected" } else { "Connecting" };
        let status = HashMap::from([
            ("type".to_string(), "network".to_string()),
            ("value".to_string(), value.to_string()),
            ("network.tcp.connections".to_string(), size.to_string()),
        ]);
        self.collaborators.status.insert(status);
    }

    /// Abort background work, then stop and forget every connection.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let connections = self.registry.drain();
        tracing::info!(count = connections.len(), "stopping peer connections");
        for connection in connections {
            connection.stop();
        }
    }
}

impl<F: ConnectionFactory + 'static> ConnectionManager<F> {
    /// Spawn bootstrap resolution and the maintenance loop.
    ///
    /// The loop holds only a weak reference, so dropping the last
    /// `Arc<ConnectionManager>` ends it as well.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::warn!("connection manager already started");
            return;
        }

        let nodes = self.settings.bootstrap.clone();
        let resolver = self.resolver.clone();
        let addresses = self.collaborators.addresses.clone();
        let per_lookup = self.settings.lookup_timeout;
        tasks.push(tokio::spawn(async move {
            resolve_bootstrap(nodes, resolver.as_ref(), addresses.as_ref(), per_lookup).await;
        }));

        let weak = Arc::downgrade(self);
        let warmup = self.settings.warmup;
        let period = self.settings.tick_interval.max(MIN_TICK_INTERVAL);
        if period != self.settings.tick_interval {
            tracing::warn!(
                configured_ms = self.settings.tick_interval.as_millis() as u64,
                "tick interval too short, clamping"
            );
        }
        tasks.push(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + warmup, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.tick();
            }
        }));

        tracing::info!(
            warmup_ms = warmup.as_millis() as u64,
            interval_ms = period.as_millis() as u64,
            target = self.settings.outbound_target,
            "connection manager started"
        );
    }
}
