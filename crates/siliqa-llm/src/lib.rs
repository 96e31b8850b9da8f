//! siliqa-llm — remote LLM, embedding and rerank capabilities.
//!
//! The core depends only on the three capability traits; concrete providers
//! are selected by configuration. One OpenAI-compatible client covers every
//! provider the service talks to (DeepSeek, OpenAI, SiliconFlow, Zhipu).

pub mod client;
pub mod error;
pub mod message;
pub mod provider;

pub use client::OpenAiCompatClient;
pub use error::{LlmError, Result};
pub use message::Message;
pub use provider::{ChatProvider, EmbeddingProvider, RerankProvider, TokenStream};
