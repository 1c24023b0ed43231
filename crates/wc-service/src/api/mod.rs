//! HTTP API
//!
//! - `POST /game/session` - Fund both parties and open a channel
//! - `GET /health` - Liveness and pool size
//! - `GET /channels` - IDs of pooled channels
//! - `GET /channels/:channel_id` - One pooled channel

mod routes;

pub use routes::{ChannelDetail, HealthResponse, SessionRequest};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use wc_core::{FundingError, SessionError};

use crate::state::ServiceState;

/// Build the API router
pub fn router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/game/session", post(routes::create_session))
        .route("/health", get(routes::health))
        .route("/channels", get(routes::list_channels))
        .route("/channels/:channel_id", get(routes::get_channel))
        .with_state(state)
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::Funding(FundingError::Denylisted(_)) => StatusCode::FORBIDDEN,
            SessionError::Funding(FundingError::Exhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        let kind = serde_json::to_value(err.kind())
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "internal_error".to_string());
        Self::new(status, kind, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
