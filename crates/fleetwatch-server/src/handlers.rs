use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use fleetwatch_core::{Imo, Vessel, VesselPatch};
use fleetwatch_store::StoreError;
use fleetwatch_telemetry::MetricSample;
use fleetwatch_tracker::SessionSnapshot;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::server::AppState;

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn fetch_vessels(State(state): State<AppState>) -> Json<Vec<Vessel>> {
    Json(state.store.list_all())
}

/// Start a tracking session for the posted IMO list.
pub async fn track(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let candidates = parse_candidates(&body)?;
    let session_id = state.tracker.start(candidates).await?;
    tracing::info!(session_id = %session_id, "Tracking requested");
    Ok(StatusCode::OK)
}

/// An empty body means "no candidates".
fn parse_candidates(body: &[u8]) -> Result<Vec<Imo>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("expected a JSON array of IMO numbers: {e}")))
}

/// Merge a vessel update. Unknown IMOs are logged by the store and still
/// answered with 200.
pub async fn updated_vessel_information(
    State(state): State<AppState>,
    Json(patch): Json<VesselPatch>,
) -> StatusCode {
    match state.store.upsert_merge(&patch) {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {}
        Err(e) => {
            tracing::error!(imo = %patch.imo, error = %e, kind = e.error_kind(), "Vessel update failed");
        }
    }
    StatusCode::OK
}

pub async fn tracking_status(
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.tracker.snapshot().await?))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Vec<MetricSample>> {
    Json(state.metrics.samples())
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let running = state.tracker.is_running();
    let (status, body_status) = if running {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(json!({
            "status": body_status,
            "clients": state.registry.count(),
            "vessels": state.store.len(),
        })),
    )
}
