//! Axum router — maps all URL paths to handlers.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{chat, documents, history, system, tasks, tools, upload};
use crate::state::SharedState;

/// Build and return the full Axum router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(system::health))
        // Ingestion
        .route("/upload", post(upload::upload))
        .route("/upload/sync", post(upload::upload_sync))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/{task_id}", get(tasks::get_task))
        // Chat
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/agentic", post(chat::chat_agentic))
        .route("/chat/agentic/stream", post(chat::chat_agentic_stream))
        // History
        .route("/history", get(history::list_conversations))
        .route(
            "/history/{conversation_id}",
            get(history::get_messages).delete(history::delete_conversation),
        )
        // Corpus
        .route("/documents", get(documents::list_documents))
        .route("/documents/{filename}", delete(documents::delete_document))
        // Tool registry
        .route("/tools/discover", post(tools::discover_tools))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
