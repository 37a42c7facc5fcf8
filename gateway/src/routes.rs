use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use botbridge_core::outbound::OutboundRequest;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Structured error body for rejected updates.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub request_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/updates", post(normalize_update))
        .route("/v1/calls", post(invoke_call))
        .route("/v1/divergences", get(list_divergences))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Raw webhook payload in, canonical event (plus correction warnings) out.
/// Malformed payloads are fatal to the single event only: 422 with a
/// machine-readable code, no retry semantics.
async fn normalize_update(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match state.adapter.normalize(&raw) {
        Ok(normalized) => (StatusCode::OK, Json(normalized)).into_response(),
        Err(err) => {
            let request_id = Uuid::now_v7().to_string();
            tracing::warn!("rejected update ({request_id}): {err}");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    error: err.code().to_string(),
                    message: err.to_string(),
                    request_id,
                }),
            )
                .into_response()
        }
    }
}

/// Outbound call in, outcome out. Always 200: degraded and failed outcomes
/// are values the collaborator inspects, not HTTP errors.
async fn invoke_call(
    State(state): State<AppState>,
    Json(request): Json<OutboundRequest>,
) -> Response {
    let outcome = state.adapter.invoke(&request).await;
    (StatusCode::OK, Json(outcome)).into_response()
}

/// Live divergence records, for operators checking what the adapter is
/// still correcting.
async fn list_divergences(State(state): State<AppState>) -> Response {
    let records = state.adapter.registry().snapshot();
    (StatusCode::OK, Json(records)).into_response()
}
