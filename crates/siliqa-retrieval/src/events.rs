//! Streaming event protocol shared by the linear and agentic pipelines.
//!
//! Ordering contract: one `metadata` event first, then zero or more
//! `content` events, then exactly one `done` (or `error`, which terminates
//! the stream).

use serde::{Deserialize, Serialize};
use siliqa_common::chunk::Chunk;

/// Preview length for source payloads.
const PREVIEW_LEN: usize = 300;

/// One retrieved source as exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// Truncated preview of the chunk.
    pub content: String,
    pub full_content: String,
    pub source: String,
    pub chunk_id: String,
    pub section: String,
}

impl SourceRef {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let chars: Vec<char> = chunk.content.chars().collect();
        let content = if chars.len() > PREVIEW_LEN {
            let head: String = chars[..PREVIEW_LEN].iter().collect();
            format!("{head}...")
        } else {
            chunk.content.clone()
        };
        Self {
            content,
            full_content: chunk.content.clone(),
            source: chunk.meta.source.clone(),
            chunk_id: chunk.meta.chunk_id.clone(),
            section: chunk.meta.section.clone(),
        }
    }
}

/// Events yielded by `query_stream` / `query_agentic_stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Metadata {
        conversation_id: String,
        sources: Vec<SourceRef>,
    },
    Content {
        content: String,
    },
    Error {
        content: String,
    },
    Done,
}
