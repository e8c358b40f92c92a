//! HTTP gateway (EMBP): merges the per-endpoint subrouters and binds the
//! shared ingestion pipeline as state.

use std::sync::Arc;

use axum::Router;

use crate::pipeline::IngestPipeline;

mod health;
mod ingest;

// ---

pub fn router(pipeline: Arc<IngestPipeline>) -> Router {
    // ---
    Router::new()
        .merge(ingest::router())
        .merge(health::router())
        .with_state(pipeline)
}
