//! coinnetd: coinnet peer-connection daemon.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use coinnet_core::config::CoinnetConfig;
use coinnet_core::Endpoint;
use coinnet_services::listener::accept_loop;
use coinnet_services::{
    AddressBook, BanTable, Collaborators, ConnectionManager, ManagerSettings, StatusBoard,
    SystemClock, TcpConnectionFactory,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CoinnetConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CoinnetConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CoinnetConfig::default()
    });
    let settings = ManagerSettings::from_config(&config);
    tracing::info!(
        port = config.network.tcp_port,
        inbound_maximum = settings.inbound_maximum,
        outbound_target = settings.outbound_target,
        bootstrap_nodes = settings.bootstrap.len(),
        "coinnetd starting"
    );

    // Collaborators
    let clock = Arc::new(SystemClock::new());
    let addresses = Arc::new(AddressBook::new(clock.clone()));
    let bans = if config.bans.persist_path.as_os_str().is_empty() {
        BanTable::new(clock.clone())
    } else {
        BanTable::with_persistence(config.bans.persist_path.clone(), clock.clone())
    };
    let status = StatusBoard::new();
    let collaborators = Collaborators {
        addresses: addresses.clone(),
        bans: Arc::new(bans.clone()),
        status: Arc::new(status.clone()),
        clock,
    };

    // Received payloads. Message framing lives above this layer.
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<(Endpoint, Bytes)>();
    let factory = TcpConnectionFactory::new(config.peers.connect_timeout())
        .with_address_database(addresses.clone())
        .with_inbound(inbound_tx);

    // Bind peer listener
    let listen_ip: IpAddr = config
        .network
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {:?}", config.network.listen_addr))?;
    let listen = SocketAddr::new(listen_ip, config.network.tcp_port);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind peer listener on {listen}"))?;

    let manager = Arc::new(ConnectionManager::new(factory, collaborators, settings));

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    manager.start();

    let listener_task = tokio::spawn(accept_loop(
        listener,
        manager.clone(),
        shutdown_tx.subscribe(),
    ));

    let inbound_task = tokio::spawn(async move {
        while let Some((peer, payload)) = inbound_rx.recv().await {
            tracing::trace!(peer = %peer, bytes = payload.len(), "payload received");
        }
    });

    let ban_sweeper = {
        let bans = bans.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                bans.sweep();
            }
        })
    };

    let peer_printer = {
        let registry = manager.registry().clone();
        let addresses = addresses.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let (new, tried) = addresses.counts();
                tracing::info!(peers = registry.len(), new, tried, "peer table snapshot");
                for (endpoint, connection) in registry.snapshot() {
                    tracing::debug!(
                        peer = %endpoint,
                        direction = %connection.direction(),
                        "  peer"
                    );
                }
            }
        })
    };

    // Status HTTP endpoint
    let api_port = config.network.api_port;
    let _api_server = {
        let state = coinnet_api::ApiState {
            registry: manager.registry().clone(),
            status: status.clone(),
            bans: bans.clone(),
            default_ban_secs: config.bans.default_ban_secs,
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = coinnet_api::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = listener_task       => tracing::error!("listener task exited: {:?}", r),
        r = inbound_task        => tracing::error!("inbound task exited: {:?}", r),
        r = ban_sweeper         => tracing::error!("ban sweeper exited: {:?}", r),
        r = peer_printer        => tracing::error!("peer printer exited: {:?}", r),
    }

    manager.stop();
    Ok(())
}
