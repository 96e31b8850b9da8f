//! siliqa-common — Shared types and errors used across all siliqa crates.

pub mod chunk;
pub mod error;
pub mod fsutil;

pub use chunk::{Chunk, ChunkMeta, ParentDocument, SourceRole};
pub use error::{Result, SiliqaError};
