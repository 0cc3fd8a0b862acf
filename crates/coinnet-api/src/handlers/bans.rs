//! /bans handlers: ban list management endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_ip, ApiState};

// ── /bans (GET) ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BanListResponse {
    pub bans: Vec<BanEntry>,
}

#[derive(Serialize)]
pub struct BanEntry {
    pub address: String,
    /// Expiry, epoch seconds.
    pub until: u64,
}

pub async fn handle_ban_list(State(state): State<ApiState>) -> Json<BanListResponse> {
    let bans = state
        .bans
        .list()
        .into_iter()
        .map(|(address, until)| BanEntry {
            address: address.to_string(),
            until,
        })
        .collect();

    Json(BanListResponse { bans })
}

// ── /bans/add (POST) ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BanAddRequest {
    pub address: String,
    /// Defaults to the configured ban length.
    pub duration_secs: Option<u64>,
}

#[derive(Serialize)]
pub struct BanAddResponse {
    pub address: String,
    pub until: u64,
    /// Live connections to the address that were dropped.
    pub disconnected: usize,
}

pub async fn handle_ban_add(
    State(state): State<ApiState>,
    Json(req): Json<BanAddRequest>,
) -> Result<Json<BanAddResponse>, (StatusCode, String)> {
    let ip = parse_ip(&req.address)?.to_canonical();
    let duration = req.duration_secs.unwrap_or(state.default_ban_secs);
    let until = state.bans.ban(ip, duration);

    let mut disconnected = 0;
    for (endpoint, connection) in state.registry.snapshot() {
        if endpoint.ip().to_canonical() == ip {
            connection.stop();
            disconnected += 1;
        }
    }
    if disconnected > 0 {
        tracing::info!(address = %ip, disconnected, "dropped connections to banned address");
    }

    Ok(Json(BanAddResponse {
        address: ip.to_string(),
        until,
        disconnected,
    }))
}

// ── /bans/remove (POST) ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BanRemoveRequest {
    pub address: String,
}

#[derive(Serialize)]
pub struct BanRemoveResponse {
    pub address: String,
    pub removed: bool,
}

pub async fn handle_ban_remove(
    State(state): State<ApiState>,
    Json(req): Json<BanRemoveRequest>,
) -> Result<Json<BanRemoveResponse>, (StatusCode, String)> {
    let ip = parse_ip(&req.address)?;
    let removed = state.bans.unban(&ip);

    Ok(Json(BanRemoveResponse {
        address: ip.to_canonical().to_string(),
        removed,
    }))
}
