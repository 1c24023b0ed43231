//! API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wc_protocol::{AccountId, ChannelId, ChannelTerms, FsmId};

use super::ApiError;
use crate::orchestrator::SessionOrchestrator;
use crate::state::ServiceState;

/// Body of `POST /game/session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Player account
    pub address: String,
    /// Host the player's node listens on
    pub host: String,
    /// Port the player's node listens on
    pub port: u16,
}

/// POST /game/session
pub async fn create_session(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<ChannelTerms>, ApiError> {
    let player = AccountId::parse(request.address)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if request.host.trim().is_empty() {
        return Err(ApiError::bad_request("host must not be empty"));
    }

    let session = SessionOrchestrator::new(state)
        .generate_game_session(player, request.host, request.port)
        .await
        .map_err(|e| {
            tracing::error!("Failed to generate game session: {}", e);
            ApiError::from(e)
        })?;

    // The lifecycle task reports through service events from here on
    Ok(Json(session.invitation))
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_channels: usize,
}

/// GET /health
pub async fn health(State(state): State<Arc<ServiceState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_channels: state.pool.len(),
    })
}

/// GET /channels
pub async fn list_channels(State(state): State<Arc<ServiceState>>) -> Json<Vec<ChannelId>> {
    let mut ids = state.pool.channel_ids();
    ids.sort();
    Json(ids)
}

/// Pooled channel
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelDetail {
    pub channel_id: ChannelId,
    pub fsm_id: FsmId,
    /// Seconds since the channel was first seen open
    pub open_for_secs: u64,
}

/// GET /channels/:channel_id
pub async fn get_channel(
    State(state): State<Arc<ServiceState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelDetail>, ApiError> {
    let channel_id =
        ChannelId::parse(channel_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let entry = state
        .pool
        .get(&channel_id)
        .ok_or_else(|| ApiError::not_found(format!("channel {} is not pooled", channel_id)))?;

    Ok(Json(ChannelDetail {
        channel_id,
        fsm_id: entry.handle.fsm_id,
        open_for_secs: entry.added_at.elapsed().as_secs(),
    }))
}
