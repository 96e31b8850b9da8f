//! siliqa-web — HTTP/SSE surface for the knowledge-base service.

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod tasks;

pub use router::build_router;
pub use state::{AppState, SharedState};
