//! coinnet integration test harness.
//!
//! Every test runs two or more complete nodes (manager, TCP factory,
//! accept loop, in-memory collaborators) on 127.0.0.1 with ephemeral
//! ports. All nodes share one IP address, so any second connection into
//! a node trips the duplicate-address rule; tests rely on that.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use coinnet_core::Endpoint;
use coinnet_services::listener::accept_loop;
use coinnet_services::{
    AddressBook, BanTable, Collaborators, ConnectionManager, ManagerSettings, StatusBoard,
    SystemClock, TcpConnectionFactory,
};

mod admission;
mod traffic;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Node {
    pub manager: Arc<ConnectionManager<TcpConnectionFactory>>,
    pub addr: SocketAddr,
    pub addresses: Arc<AddressBook>,
    pub bans: BanTable,
    pub status: StatusBoard,
    pub inbound: mpsc::UnboundedReceiver<(Endpoint, Bytes)>,
    shutdown: broadcast::Sender<()>,
}

/// Settings with timers slow enough that only explicit ticks run.
pub fn settings() -> ManagerSettings {
    ManagerSettings {
        inbound_maximum: 8,
        outbound_target: 8,
        bootstrap: Vec::new(),
        warmup: Duration::from_secs(3600),
        tick_interval: Duration::from_secs(3600),
        retry_backoff_secs: 600,
        lookup_timeout: Duration::from_secs(1),
    }
}

impl Node {
    pub async fn spawn(settings: ManagerSettings) -> Result<Node> {
        let clock = Arc::new(SystemClock::new());
        let addresses = Arc::new(AddressBook::new(clock.clone()));
        let bans = BanTable::new(clock.clone());
        let status = StatusBoard::new();
        let collaborators = Collaborators {
            addresses: addresses.clone(),
            bans: Arc::new(bans.clone()),
            status: Arc::new(status.clone()),
            clock,
        };

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let factory = TcpConnectionFactory::new(Duration::from_secs(2))
            .with_address_database(addresses.clone())
            .with_inbound(inbound_tx);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind test listener")?;
        let addr = listener.local_addr()?;

        let manager = Arc::new(ConnectionManager::new(factory, collaborators, settings));
        let (shutdown, _) = broadcast::channel(1);
        tokio::spawn(accept_loop(listener, manager.clone(), shutdown.subscribe()));

        Ok(Node {
            manager,
            addr,
            addresses,
            bans,
            status,
            inbound,
            shutdown,
        })
    }

    /// True once every registered connection is gone or invalid.
    pub fn all_closed(&self) -> bool {
        self.manager
            .registry()
            .snapshot()
            .iter()
            .all(|(_, connection)| !connection.is_transport_valid())
    }

    /// True once there is a registered connection and all of them are valid.
    pub fn all_open(&self) -> bool {
        let peers = self.manager.registry().snapshot();
        !peers.is_empty() && peers.iter().all(|(_, c)| c.is_transport_valid())
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
        self.manager.stop();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `cond` every 10 ms for up to 5 s.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Next received payload, or an error after 5 s.
pub async fn recv_payload(node: &mut Node) -> Result<(Endpoint, Bytes)> {
    tokio::time::timeout(Duration::from_secs(5), node.inbound.recv())
        .await
        .context("timed out waiting for payload")?
        .context("inbound channel closed")
}
