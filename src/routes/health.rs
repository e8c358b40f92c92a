// src/routes/health.rs
//! API health check endpoint for the ingestion service.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) to verify that the service is running. It is a
//! sibling module in the `routes` directory and follows the Explicit Module
//! Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pipeline::{IngestPipeline, IngestStatsSnapshot};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    stats: IngestStatsSnapshot,
}

/// Handle `GET /health`.
///
/// Reports liveness plus the pipeline's running counters. Does not touch the
/// database, the broker or the cache.
async fn health(State(pipeline): State<Arc<IngestPipeline>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: pipeline.stats(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<Arc<IngestPipeline>> {
    Router::new().route("/health", get(health))
}
