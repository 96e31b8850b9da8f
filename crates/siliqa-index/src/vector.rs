//! Embedding-backed vector collection.
//!
//! Thin adapter over a persistent on-disk collection: chunks are embedded
//! through the configured provider (which batches API calls at 16 inputs)
//! and inserted in batches of at most 4000 records. Similarity search is a
//! cosine-distance scan over the collection; ranks feed the RRF fusion, so
//! only ordering matters downstream.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use siliqa_common::chunk::{Chunk, ChunkMeta};
use siliqa_common::fsutil::write_json_atomic;
use siliqa_common::{Result, SiliqaError};
use siliqa_llm::EmbeddingProvider;
use tracing::{debug, info};

/// Insertion batch cap (the original store rejects larger writes).
const INSERT_BATCH: usize = 4000;
const COLLECTION_FILE: &str = "collection.json";

#[derive(Clone, Serialize, Deserialize)]
struct VectorRecord {
    id: String,
    content: String,
    meta: ChunkMeta,
    embedding: Vec<f32>,
}

pub struct VectorStore {
    dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    records: RwLock<Vec<VectorRecord>>,
}

impl VectorStore {
    /// Open or create the collection under `dir`.
    pub fn open(dir: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(COLLECTION_FILE);
        let records = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Vec::new()
        };
        info!(dir = %dir.display(), count = records.len(), "vector store opened");

        Ok(Self { dir, embedder, records: RwLock::new(records) })
    }

    fn collection_path(&self) -> PathBuf {
        self.dir.join(COLLECTION_FILE)
    }

    /// Directory holding the collection (the lexical cache lives here too).
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn persist(&self) -> Result<()> {
        let records = self.records.read().expect("vector store lock poisoned");
        write_json_atomic(&self.collection_path(), &*records)
    }

    /// Embed and insert chunks, batched at [`INSERT_BATCH`] records.
    pub async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        let mut inserted = 0;
        for batch in chunks.chunks(INSERT_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| SiliqaError::Provider(e.to_string()))?;
            if embeddings.len() != batch.len() {
                return Err(SiliqaError::Provider(format!(
                    "embedding count mismatch: {} chunks, {} vectors",
                    batch.len(),
                    embeddings.len()
                )));
            }

            {
                let mut records = self.records.write().expect("vector store lock poisoned");
                for (chunk, embedding) in batch.iter().zip(embeddings) {
                    records.push(VectorRecord {
                        id: chunk.meta.chunk_id.clone(),
                        content: chunk.content.clone(),
                        meta: chunk.meta.clone(),
                        embedding,
                    });
                }
            }
            self.persist()?;
            inserted += batch.len();
            debug!(batch = batch.len(), total = inserted, "vector batch inserted");
        }
        Ok(inserted)
    }

    /// Top-k chunks by cosine distance (lower is closer).
    pub async fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<(Chunk, f32)>> {
        let query_embedding = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await
            .map_err(|e| SiliqaError::Provider(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SiliqaError::Provider("empty embedding response".into()))?;

        let records = self.records.read().expect("vector store lock poisoned");
        let mut scored: Vec<(Chunk, f32)> = records
            .iter()
            .map(|r| {
                let distance = 1.0 - cosine_similarity(&query_embedding, &r.embedding);
                (Chunk { content: r.content.clone(), meta: r.meta.clone() }, distance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn count(&self) -> usize {
        self.records.read().expect("vector store lock poisoned").len()
    }

    /// Every stored chunk, in insertion order (feeds lexical rebuilds).
    pub fn all_documents(&self) -> Vec<Chunk> {
        self.records
            .read()
            .expect("vector store lock poisoned")
            .iter()
            .map(|r| Chunk { content: r.content.clone(), meta: r.meta.clone() })
            .collect()
    }

    /// Record ids belonging to `source`.
    pub fn ids_for_source(&self, source: &str) -> Vec<String> {
        self.records
            .read()
            .expect("vector store lock poisoned")
            .iter()
            .filter(|r| r.meta.source == source)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Delete records by id; persists when anything was removed.
    pub fn delete_ids(&self, ids: &[String]) -> Result<usize> {
        let removed = {
            let mut records = self.records.write().expect("vector store lock poisoned");
            let before = records.len();
            records.retain(|r| !ids.contains(&r.id));
            before - records.len()
        };
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Distinct sources with their chunk counts.
    pub fn sources(&self) -> Vec<(String, usize)> {
        let records = self.records.read().expect("vector store lock poisoned");
        let mut counts: Vec<(String, usize)> = Vec::new();
        for r in records.iter() {
            match counts.iter_mut().find(|(s, _)| s == &r.meta.source) {
                Some((_, n)) => *n += 1,
                None => counts.push((r.meta.source.clone(), 1)),
            }
        }
        counts
    }

    /// Remove every record and persist the empty collection.
    pub fn clear(&self) -> Result<()> {
        self.records.write().expect("vector store lock poisoned").clear();
        self.persist()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
