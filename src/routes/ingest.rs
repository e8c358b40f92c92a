//! Trusted HTTP ingress for readings.
//!
//! Gateways that cannot reach the broker post readings here. They go through
//! the same pipeline as MQTT frames, so resolution, persistence and cache
//! invalidation behave identically.

use std::sync::Arc;

use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json,
    Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::pipeline::IngestPipeline;

// ---

pub fn router() -> Router<Arc<IngestPipeline>> {
    // ---
    Router::new().route("/api/v1/devices/log", post(handler))
}

/// Body returned for a stored reading.
#[derive(Debug, Serialize)]
struct LogResponse {
    message: &'static str,
    device_id: i64,
    serial_number: String,
    registered: bool,
    user_assigned: bool,
}

async fn handler(State(pipeline): State<Arc<IngestPipeline>>, body: Bytes) -> impl IntoResponse {
    // ---
    info!("POST /api/v1/devices/log - {} bytes", body.len());

    match pipeline.ingest(&body).await {
        Ok(receipt) => {
            let response = LogResponse {
                message: "device data logged successfully",
                device_id: receipt.device.id,
                serial_number: receipt.device.serial_number.clone(),
                registered: true,
                user_assigned: receipt.user_assigned(),
            };
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(e) if e.is_malformed_input() => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        // Storage details stay in the log.
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to log device data" })),
        )
            .into_response(),
    }
}
