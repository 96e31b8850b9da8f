//! Liveness/readiness probe.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    let vector_db_status = if state.engine.is_ready() { "connected" } else { "initializing" };
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "vector_db_status": vector_db_status,
    }))
}
