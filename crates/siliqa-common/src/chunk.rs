//! Child chunk and parent section data model.
//!
//! Children are the unit of indexing, retrieval and grading; parents hold the
//! full cleaned section text and are substituted in just before generation.
//! Children reference their parent by id only — the parent map store owns all
//! parent texts.

use serde::{Deserialize, Serialize};

/// Role assigned at query time by the source-priority filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    Primary,
    Supplementary,
}

impl Default for SourceRole {
    fn default() -> Self {
        SourceRole::Primary
    }
}

/// Metadata carried by every indexed child chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Originating file name.
    pub source: String,
    /// Stable identifier of the enclosing section.
    pub parent_id: String,
    /// Leaf section title.
    pub section: String,
    /// Full breadcrumb path, e.g. `[Source: fc_ug.pdf] > Placement > Congestion`.
    pub context: String,
    /// Unique id within the corpus: `<parent_id>_<ordinal>`.
    pub chunk_id: String,
    /// Ordinal of this child within its parent.
    #[serde(default)]
    pub child_index: usize,
    #[serde(default)]
    pub source_role: SourceRole,
}

/// Unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Text to embed/tokenize, prefixed with the context path.
    pub content: String,
    pub meta: ChunkMeta,
}

impl Chunk {
    /// Deduplication key shared by the dense and sparse retrieval branches.
    /// Both branches must key on `<source>_<chunk_id>` or fused scores
    /// double-count.
    pub fn fuse_key(&self) -> String {
        format!("{}_{}", self.meta.source, self.meta.chunk_id)
    }
}

/// Parent section text handed to the generator, possibly windowed around the
/// retrieved child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentDocument {
    pub parent_id: String,
    pub source: String,
    pub content: String,
    /// True when the parent exceeded the window threshold and only a slice
    /// around the child is included.
    pub is_windowed: bool,
    pub source_role: SourceRole,
}
