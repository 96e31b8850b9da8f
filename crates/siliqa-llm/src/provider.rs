//! Capability traits for the remote services the core depends on.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::Message;

/// Stream of answer fragments; the sender side closes the channel when the
/// provider signals completion, and pushes an `Err` before closing on
/// mid-stream failure.
pub type TokenStream = mpsc::Receiver<Result<String>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Complete a chat request, returning the full answer text.
    async fn chat(&self, messages: &[Message]) -> Result<String>;

    /// Same as [`chat`](Self::chat) with an explicit per-request timeout
    /// (grading uses tighter deadlines than generation).
    async fn chat_with_timeout(&self, messages: &[Message], timeout: Duration) -> Result<String>;

    /// Start a streaming completion; fragments arrive in generation order.
    async fn stream(&self, messages: &[Message]) -> Result<TokenStream>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. Implementations must respect the upstream
    /// API batch cap (16 inputs per call) and return vectors in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Cross-encoder rerank: returns `(original_index, relevance_score)`
    /// pairs sorted by descending relevance, at most `top_n` of them.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize)
        -> Result<Vec<(usize, f32)>>;
}
