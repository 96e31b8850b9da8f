//! Tool-registry auto-discovery endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::SharedState;

/// Scan the corpus and extend the tool registry with unclaimed sources.
pub async fn discover_tools(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let new_tools = state.engine.discover_tools()?;
    Ok(Json(json!({
        "status": "success",
        "count": new_tools.len(),
        "new_tools": new_tools,
    })))
}
