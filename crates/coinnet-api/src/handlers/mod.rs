//! HTTP API handlers: exposes node networking state as JSON.

pub mod bans;
pub mod status;

use std::net::IpAddr;

use axum::http::StatusCode;

use coinnet_services::{BanTable, ConnectionRegistry, StatusBoard};

#[derive(Clone)]
pub struct ApiState {
    pub registry: ConnectionRegistry,
    pub status: StatusBoard,
    pub bans: BanTable,
    /// Ban length used when a request does not give one.
    pub default_ban_secs: u64,
    /// Fires once to shut the daemon down.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn parse_ip(s: &str) -> Result<IpAddr, (StatusCode, String)> {
    s.trim()
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid IP address: {s}")))
}

pub use bans::{handle_ban_add, handle_ban_list, handle_ban_remove};
pub use status::{handle_peers, handle_shutdown, handle_status};
