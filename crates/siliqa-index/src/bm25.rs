//! Okapi BM25 lexical index over tokenized child chunks.
//!
//! The index is rebuilt on every write (append or source removal) and
//! snapshotted as JSON inside the vector-store directory. Loading is gated by
//! the vector store's document count: a diverging cache is discarded and the
//! index rebuilt from the vector store's stored documents.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use siliqa_common::chunk::{Chunk, ChunkMeta};
use siliqa_common::fsutil::write_json_atomic;
use siliqa_common::Result;
use tracing::{info, warn};

use crate::tokenizer;

const K1: f64 = 1.5;
const B: f64 = 0.75;
/// Ids sampled from the head, middle and tail for the integrity hash.
const HASH_SAMPLE: usize = 10;

/// Per-corpus term statistics, derived from the documents on every rebuild.
struct Bm25State {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freqs: HashMap<String, usize>,
    avg_doc_len: f64,
}

#[derive(Default)]
pub struct Bm25Index {
    documents: Vec<String>,
    metas: Vec<ChunkMeta>,
    state: Option<Bm25State>,
}

/// On-disk snapshot. Term statistics are cheap to derive, so only the raw
/// documents and metadata are persisted.
#[derive(Serialize, Deserialize)]
struct Bm25Snapshot {
    documents: Vec<String>,
    metas: Vec<ChunkMeta>,
    sample_hash: u64,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Reconstruct the chunk stored at `index`.
    pub fn chunk_at(&self, index: usize) -> Option<Chunk> {
        Some(Chunk {
            content: self.documents.get(index)?.clone(),
            meta: self.metas.get(index)?.clone(),
        })
    }

    /// Append chunks and rebuild the term statistics.
    pub fn add(&mut self, chunks: &[Chunk]) {
        for chunk in chunks {
            self.documents.push(chunk.content.clone());
            self.metas.push(chunk.meta.clone());
        }
        self.rebuild();
    }

    /// Drop every document belonging to `source` and rebuild.
    pub fn remove_source(&mut self, source: &str) -> usize {
        let before = self.documents.len();
        let mut kept_docs = Vec::with_capacity(before);
        let mut kept_metas = Vec::with_capacity(before);
        for (doc, meta) in self.documents.drain(..).zip(self.metas.drain(..)) {
            if meta.source != source {
                kept_docs.push(doc);
                kept_metas.push(meta);
            }
        }
        self.documents = kept_docs;
        self.metas = kept_metas;
        self.rebuild();
        before - self.documents.len()
    }

    /// Wipe the index and remove the cache file.
    pub fn clear(&mut self, cache_path: &Path) {
        self.documents.clear();
        self.metas.clear();
        self.state = None;
        if cache_path.exists() {
            if let Err(e) = std::fs::remove_file(cache_path) {
                warn!(error = %e, "failed to remove lexical cache");
            }
        }
    }

    fn rebuild(&mut self) {
        if self.documents.is_empty() {
            self.state = None;
            return;
        }

        let mut term_freqs = Vec::with_capacity(self.documents.len());
        let mut doc_lens = Vec::with_capacity(self.documents.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for doc in &self.documents {
            let tokens = tokenizer::tokenize(doc);
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let avg_doc_len =
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len().max(1) as f64;
        self.state = Some(Bm25State { term_freqs, doc_lens, doc_freqs, avg_doc_len });
    }

    /// Top-k `(document_index, score)` pairs for `query`, highest first.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(usize, f64)> {
        let Some(state) = &self.state else {
            return Vec::new();
        };

        let query_tokens = tokenizer::tokenize(query);
        let n = self.documents.len() as f64;

        let mut scored: Vec<(usize, f64)> = (0..self.documents.len())
            .map(|i| {
                let tf_map = &state.term_freqs[i];
                let dl = state.doc_lens[i] as f64;
                let mut score = 0.0;
                for token in &query_tokens {
                    let Some(&tf) = tf_map.get(token) else { continue };
                    let df = *state.doc_freqs.get(token).unwrap_or(&0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let tf = tf as f64;
                    let denom = tf + K1 * (1.0 - B + B * dl / state.avg_doc_len);
                    score += idf * tf * (K1 + 1.0) / denom;
                }
                (i, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Persist the index snapshot atomically.
    pub fn persist(&self, cache_path: &Path) -> Result<()> {
        let snapshot = Bm25Snapshot {
            documents: self.documents.clone(),
            metas: self.metas.clone(),
            sample_hash: sample_id_hash(&self.metas),
        };
        write_json_atomic(cache_path, &snapshot)
    }

    /// Load a cached index if its document count matches `expected_count`.
    ///
    /// The sampled-id hash is verified and logged on mismatch but does not
    /// gate the load; count divergence does.
    pub fn load(cache_path: &Path, expected_count: usize) -> Option<Self> {
        let bytes = std::fs::read(cache_path).ok()?;
        let snapshot: Bm25Snapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "lexical cache unreadable, rebuilding");
                return None;
            }
        };

        if snapshot.documents.len() != expected_count {
            info!(
                cached = snapshot.documents.len(),
                expected = expected_count,
                "lexical cache count diverges from vector store, rebuilding"
            );
            return None;
        }

        let computed = sample_id_hash(&snapshot.metas);
        if computed != snapshot.sample_hash {
            warn!(
                stored = snapshot.sample_hash,
                computed, "lexical cache sample hash diverges (not load-gating)"
            );
        }

        let mut index = Bm25Index {
            documents: snapshot.documents,
            metas: snapshot.metas,
            state: None,
        };
        index.rebuild();
        Some(index)
    }
}

/// FNV-1a over the first/middle/last [`HASH_SAMPLE`] chunk ids.
fn sample_id_hash(metas: &[ChunkMeta]) -> u64 {
    let n = metas.len();
    let mut indices: Vec<usize> = Vec::new();
    indices.extend(0..HASH_SAMPLE.min(n));
    if n > 2 * HASH_SAMPLE {
        let mid = n / 2;
        indices.extend(mid..(mid + HASH_SAMPLE).min(n));
    }
    indices.extend(n.saturating_sub(HASH_SAMPLE)..n);
    indices.sort_unstable();
    indices.dedup();

    let mut hash: u64 = 0xcbf29ce484222325;
    for i in indices {
        for byte in metas[i].chunk_id.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use siliqa_common::chunk::SourceRole;

    fn chunk(source: &str, id: &str, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            meta: ChunkMeta {
                source: source.to_string(),
                parent_id: format!("{source}_sec_000_X"),
                section: "X".to_string(),
                context: format!("[Source: {source}] > X"),
                chunk_id: id.to_string(),
                child_index: 0,
                source_role: SourceRole::Primary,
            },
        }
    }

    #[test]
    fn search_ranks_matching_document_first() {
        let mut index = Bm25Index::new();
        index.add(&[
            chunk("a.pdf", "a_0", "congestion aware placement reduces routing overflow"),
            chunk("a.pdf", "a_1", "clock tree synthesis balances insertion delay"),
            chunk("b.pdf", "b_0", "static timing analysis checks setup and hold"),
        ]);

        let hits = index.search("congestion placement", 3);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = Bm25Index::new();
        assert!(index.search("anything", 5).is_empty());
    }

    #[test]
    fn remove_source_drops_only_that_source() {
        let mut index = Bm25Index::new();
        index.add(&[
            chunk("a.pdf", "a_0", "alpha"),
            chunk("b.pdf", "b_0", "beta"),
            chunk("a.pdf", "a_1", "gamma"),
        ]);
        let removed = index.remove_source("a.pdf");
        assert_eq!(removed, 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.chunk_at(0).unwrap().meta.source, "b.pdf");
    }

    #[test]
    fn persisted_cache_reloads_with_identical_search_results() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("bm25_index.json");

        let mut index = Bm25Index::new();
        index.add(&[
            chunk("a.pdf", "a_0", "report timing paths after optimization"),
            chunk("a.pdf", "a_1", "power analysis with switching activity"),
        ]);
        index.persist(&cache).unwrap();

        let reloaded = Bm25Index::load(&cache, 2).unwrap();
        let before = index.search("report timing", 2);
        let after = reloaded.search("report timing", 2);
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.0, b.0);
            assert!((a.1 - b.1).abs() < 1e-12);
        }
    }

    #[test]
    fn count_divergence_discards_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("bm25_index.json");

        let mut index = Bm25Index::new();
        index.add(&[chunk("a.pdf", "a_0", "alpha")]);
        index.persist(&cache).unwrap();

        assert!(Bm25Index::load(&cache, 1).is_some());
        assert!(Bm25Index::load(&cache, 5).is_none());
    }

    #[test]
    fn clear_removes_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("bm25_index.json");

        let mut index = Bm25Index::new();
        index.add(&[chunk("a.pdf", "a_0", "alpha")]);
        index.persist(&cache).unwrap();
        assert!(cache.exists());

        index.clear(&cache);
        assert!(index.is_empty());
        assert!(!cache.exists());
    }
}
