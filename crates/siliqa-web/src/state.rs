//! Shared application state for the web server.

use std::sync::Arc;

use siliqa_agent::AgenticRag;
use siliqa_retrieval::RagEngine;

use crate::tasks::TaskManager;

/// Shared state injected into every Axum handler.
pub struct AppState {
    pub engine: Arc<RagEngine>,
    pub agentic: AgenticRag,
    pub tasks: Arc<TaskManager>,
}

impl AppState {
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self {
            agentic: AgenticRag::new(Arc::clone(&engine)),
            engine,
            tasks: Arc::new(TaskManager::new()),
        }
    }
}

pub type SharedState = Arc<AppState>;
