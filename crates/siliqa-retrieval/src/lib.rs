//! siliqa-retrieval — the hybrid retrieval engine and query orchestrator.
//!
//! The retrieval pipeline: multi-query expansion → per-query hybrid search
//! with query-adaptive weights → weighted Reciprocal Rank Fusion →
//! cross-query union → source-priority filter → cross-encoder rerank →
//! (before generation only) parent-window expansion.

pub mod engine;
pub mod events;
pub mod expand;
pub mod hybrid;
pub mod prompts;
pub mod tools;

pub use engine::{DocumentInfo, QueryResponse, RagEngine};
pub use events::{SourceRef, StreamEvent};
pub use tools::{ToolEntry, ToolRegistry};
