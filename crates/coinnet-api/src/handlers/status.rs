//! /status, /peers, /daemon/shutdown handlers.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use coinnet_core::group_of;
use coinnet_services::{Direction, StatusRecord};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    /// "Connected" or "Connecting".
    pub network: String,
    pub connections: usize,
    /// Latest record posted by each subsystem, keyed by type.
    pub records: HashMap<String, StatusRecord>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let connections = state.registry.snapshot().len();
    let network = if connections > 0 {
        "Connected"
    } else {
        "Connecting"
    };

    Json(StatusResponse {
        network: network.to_string(),
        connections,
        records: state.status.all(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Serialize)]
pub struct PeerInfo {
    pub endpoint: String,
    pub direction: Direction,
    pub group: String,
    pub valid: bool,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let peers = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(endpoint, connection)| PeerInfo {
            endpoint: endpoint.to_string(),
            direction: connection.direction(),
            group: group_of(&endpoint.ip()).to_string(),
            valid: connection.is_transport_valid(),
        })
        .collect();

    Json(PeersResponse { peers })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    // Nobody listening means the daemon is already on its way out.
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
