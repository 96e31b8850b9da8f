//! Chat-history read/delete endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use siliqa_history::{ConversationRow, MessageRow};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_conversations(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ConversationRow>>> {
    Ok(Json(state.engine.history().conversations(query.limit)?))
}

pub async fn get_messages(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<MessageRow>>> {
    Ok(Json(state.engine.history().messages(&conversation_id)?))
}

pub async fn delete_conversation(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.engine.history().delete_conversation(&conversation_id)? {
        return Err(ApiError::not_found(format!("conversation {conversation_id}")));
    }
    Ok(Json(json!({ "status": "success", "id": conversation_id })))
}
