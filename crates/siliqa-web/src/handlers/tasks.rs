//! Task polling endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;
use crate::tasks::TaskRecord;

pub async fn get_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    state
        .tasks
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("task {task_id}")))
}

pub async fn list_tasks(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "tasks": state.tasks.list() }))
}
