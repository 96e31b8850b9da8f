//! Chat endpoints: linear and agentic RAG, each with a non-streaming and an
//! SSE variant. SSE frames are `data: <json>\n\n` with the event protocol of
//! `siliqa_retrieval::events`.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use siliqa_agent::AgenticResponse;
use siliqa_retrieval::{QueryResponse, StreamEvent};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub conversation_id: Option<String>,
}

fn sse_stream(
    rx: mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","content":"serialization failure"}"#.to_string());
        Ok(Event::default().data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Linear RAG, non-streaming.
pub async fn chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let response = state
        .engine
        .query(request.question, request.conversation_id)
        .await?;
    Ok(Json(response))
}

/// Linear RAG over SSE.
pub async fn chat_stream(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state
        .engine
        .query_stream(request.question, request.conversation_id);
    sse_stream(rx)
}

/// Agentic RAG, non-streaming; includes loop telemetry.
pub async fn chat_agentic(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<AgenticResponse>> {
    let response = state
        .agentic
        .query(request.question, request.conversation_id)
        .await?;
    Ok(Json(response))
}

/// Agentic RAG over SSE: routes/retrieves/grades/rewrites first, then
/// streams the generation.
pub async fn chat_agentic_stream(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state
        .agentic
        .query_stream(request.question, request.conversation_id);
    sse_stream(rx)
}
