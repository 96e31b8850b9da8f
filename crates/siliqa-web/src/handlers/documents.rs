//! Corpus listing and removal.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

pub async fn list_documents(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "documents": state.engine.list_documents() }))
}

pub async fn delete_document(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.engine.delete_document(&filename).await? {
        return Err(ApiError::not_found(format!("document {filename}")));
    }
    Ok(Json(json!({ "status": "deleted", "filename": filename })))
}
