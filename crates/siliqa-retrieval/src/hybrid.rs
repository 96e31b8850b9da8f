//! Hybrid retrieval stages.
//!
//! Everything after multi-query expansion is a pure function of its inputs;
//! the async glue (`HybridRetriever`) only sequences LLM/search calls and
//! degrades on provider failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use siliqa_common::chunk::{Chunk, SourceRole};
use siliqa_common::Result;
use siliqa_index::{Bm25Index, VectorStore};
use siliqa_llm::{ChatProvider, Message, RerankProvider};
use tracing::{debug, info, warn};

use crate::prompts::MULTI_QUERY_PROMPT;
use crate::tools::ToolRegistry;

/// RRF rank constant (Cormack et al.).
const RRF_K: f64 = 60.0;
/// Command-style queries (e.g. `set_max_delay`) lean on the lexical index.
const COMMAND_WEIGHTS: (f64, f64) = (0.3, 0.7);
/// Short keyword queries lean lexical too, less aggressively.
const SHORT_QUERY_WEIGHTS: (f64, f64) = (0.4, 0.6);
/// At most this many supplementary (other-tool) documents survive the
/// source-priority filter.
const MAX_SUPPLEMENTARY: usize = 1;

// ── Query-adaptive weights ────────────────────────────────────────────────────

fn command_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(set|get|report|check|remove|reset|create|read)_\w+").expect("command regex")
    })
}

/// `(vector_weight, bm25_weight)` for one query.
pub fn adaptive_weights(query: &str, defaults: (f64, f64)) -> (f64, f64) {
    if command_pattern().is_match(query) {
        return COMMAND_WEIGHTS;
    }
    let token_count = query.split_whitespace().count();
    let interrogative = query.contains('?') || query.contains('？');
    if token_count <= 3 && !interrogative {
        return SHORT_QUERY_WEIGHTS;
    }
    defaults
}

// ── Fusion ────────────────────────────────────────────────────────────────────

/// Weighted Reciprocal Rank Fusion of one dense and one sparse ranking.
///
/// Contribution of rank `r` (0-based) is `w / (60 + r)`; a chunk's fused
/// score sums contributions across both modalities. Both branches key on
/// `<source>_<chunk_id>`; the dense-branch chunk object wins when both carry
/// the same id (canonicalize-by-id).
pub fn rrf_fuse(dense: &[Chunk], sparse: &[Chunk], weights: (f64, f64), top_k: usize) -> Vec<Chunk> {
    let (w_vector, w_bm25) = weights;
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, Chunk> = HashMap::new();

    for (rank, chunk) in dense.iter().enumerate() {
        let key = chunk.fuse_key();
        *scores.entry(key.clone()).or_insert(0.0) += w_vector / (RRF_K + rank as f64);
        if !by_key.contains_key(&key) {
            order.push(key.clone());
            by_key.insert(key, chunk.clone());
        }
    }
    for (rank, chunk) in sparse.iter().enumerate() {
        let key = chunk.fuse_key();
        *scores.entry(key.clone()).or_insert(0.0) += w_bm25 / (RRF_K + rank as f64);
        if !by_key.contains_key(&key) {
            order.push(key.clone());
            by_key.insert(key, chunk.clone());
        }
    }

    // Sort by fused score, first-seen order breaking ties.
    let first_seen: HashMap<&String, usize> =
        order.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let mut keys: Vec<&String> = order.iter().collect();
    keys.sort_by(|a, b| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_seen[*a].cmp(&first_seen[*b]))
    });

    keys.into_iter().take(top_k).map(|k| by_key[k].clone()).collect()
}

/// Union of per-query result lists, deduplicated by fuse key, preserving
/// best-seen (first) order.
pub fn union_first_seen(lists: Vec<Vec<Chunk>>) -> Vec<Chunk> {
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut merged = Vec::new();
    for list in lists {
        for chunk in list {
            if seen.insert(chunk.fuse_key(), ()).is_none() {
                merged.push(chunk);
            }
        }
    }
    merged
}

// ── Multi-query expansion ─────────────────────────────────────────────────────

/// Parse `QUERYn: …` lines out of the rewrite response. The original
/// question is always retained and duplicates are dropped.
pub fn parse_multi_queries(response: &str, original: &str) -> Vec<String> {
    let mut queries = vec![original.to_string()];
    for line in response.lines() {
        let line = line.trim();
        if !line.starts_with("QUERY") {
            continue;
        }
        if let Some((_, rewrite)) = line.split_once(':') {
            let rewrite = rewrite.trim();
            if !rewrite.is_empty() && rewrite != original && !queries.iter().any(|q| q == rewrite) {
                queries.push(rewrite.to_string());
            }
        }
    }
    queries
}

// ── Source-priority filter ────────────────────────────────────────────────────

/// Partition results by the tool the query names. Matching documents become
/// `primary`; at most [`MAX_SUPPLEMENTARY`] non-matching document survives as
/// `supplementary`. Without a tool match everything is `primary`.
pub fn apply_source_priority(
    question: &str,
    chunks: Vec<Chunk>,
    registry: &ToolRegistry,
) -> Vec<Chunk> {
    let Some(tool) = registry.match_query(question) else {
        return chunks
            .into_iter()
            .map(|mut c| {
                c.meta.source_role = SourceRole::Primary;
                c
            })
            .collect();
    };

    let mut primary = Vec::new();
    let mut supplementary = Vec::new();
    for mut chunk in chunks {
        if ToolRegistry::source_matches(&tool, &chunk.meta.source) {
            chunk.meta.source_role = SourceRole::Primary;
            primary.push(chunk);
        } else if supplementary.len() < MAX_SUPPLEMENTARY {
            chunk.meta.source_role = SourceRole::Supplementary;
            supplementary.push(chunk);
        }
    }

    info!(
        tool = %tool.id,
        primary = primary.len(),
        supplementary = supplementary.len(),
        "source-priority filter applied"
    );
    primary.extend(supplementary);
    primary
}

// ── Async retriever ───────────────────────────────────────────────────────────

pub struct HybridRetriever {
    pub vector: Arc<VectorStore>,
    pub bm25: Arc<Mutex<Bm25Index>>,
    pub chat: Arc<dyn ChatProvider>,
    pub reranker: Option<Arc<dyn RerankProvider>>,
    pub tools: Arc<ToolRegistry>,
    pub top_k: usize,
    pub top_n: usize,
    pub default_weights: (f64, f64),
}

impl HybridRetriever {
    /// Per-query candidate budget once the expansion count is known.
    /// Observed behavior of the source system; a tuning parameter.
    fn per_query_k(&self, n_queries: usize) -> usize {
        self.top_k / n_queries.max(1) + 5
    }

    /// Ask the LLM for three rewrites; degrade to the original on failure.
    pub async fn expand_queries(&self, question: &str) -> Vec<String> {
        let prompt = MULTI_QUERY_PROMPT.replace("{question}", question);
        match self.chat.chat(&[Message::user(prompt)]).await {
            Ok(response) => {
                let queries = parse_multi_queries(&response, question);
                debug!(count = queries.len(), "multi-query expansion");
                queries
            }
            Err(e) => {
                warn!(error = %e, "multi-query expansion failed, using original query only");
                vec![question.to_string()]
            }
        }
    }

    /// One hybrid search: dense + sparse top-k fused with adaptive weights.
    pub async fn search_one(&self, query: &str, top_k: usize) -> Result<Vec<Chunk>> {
        let weights = adaptive_weights(query, self.default_weights);

        let dense: Vec<Chunk> = self
            .vector
            .similarity_search(query, top_k)
            .await?
            .into_iter()
            .map(|(chunk, _)| chunk)
            .collect();

        let sparse: Vec<Chunk> = {
            let bm25 = self.bm25.lock().expect("bm25 lock poisoned");
            bm25.search(query, top_k)
                .into_iter()
                .filter_map(|(idx, _)| bm25.chunk_at(idx))
                .collect()
        };

        Ok(rrf_fuse(&dense, &sparse, weights, top_k))
    }

    /// Stages 1–5: expansion, per-query search, union, source filter,
    /// rerank. Returns at most `top_n` child chunks; parent expansion is the
    /// caller's concern (it must run after grading).
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        let queries = self.expand_queries(query).await;
        let per_query_k = self.per_query_k(queries.len());

        let mut per_query_results = Vec::with_capacity(queries.len());
        for q in &queries {
            match self.search_one(q, per_query_k).await {
                Ok(chunks) => per_query_results.push(chunks),
                Err(e) => warn!(query = %q, error = %e, "hybrid search failed for one query"),
            }
        }

        let candidates = union_first_seen(per_query_results);
        debug!(candidates = candidates.len(), "cross-query union");

        let candidates = apply_source_priority(query, candidates, &self.tools);
        self.rerank(query, candidates).await
    }

    /// Rerank with the cross-encoder; keep the fused order on failure or
    /// when reranking is disabled.
    async fn rerank(&self, query: &str, candidates: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let Some(reranker) = &self.reranker else {
            return Ok(candidates.into_iter().take(self.top_n).collect());
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let contents: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
        match reranker.rerank(query, &contents, self.top_n).await {
            Ok(ranking) => Ok(ranking
                .into_iter()
                .filter_map(|(idx, _)| candidates.get(idx).cloned())
                .collect()),
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping fused order");
                Ok(candidates.into_iter().take(self.top_n).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siliqa_common::chunk::ChunkMeta;

    fn chunk(source: &str, chunk_id: &str) -> Chunk {
        Chunk {
            content: format!("content of {chunk_id}"),
            meta: ChunkMeta {
                source: source.to_string(),
                parent_id: format!("{source}_sec_000_X"),
                section: "X".to_string(),
                context: format!("[Source: {source}] > X"),
                chunk_id: chunk_id.to_string(),
                child_index: 0,
                source_role: SourceRole::Primary,
            },
        }
    }

    #[test]
    fn command_queries_weight_lexical() {
        assert_eq!(adaptive_weights("how to use set_max_delay here", (0.5, 0.5)), (0.3, 0.7));
        assert_eq!(adaptive_weights("report_timing options", (0.5, 0.5)), (0.3, 0.7));
    }

    #[test]
    fn short_non_interrogative_queries_weight_lexical_mildly() {
        assert_eq!(adaptive_weights("congestion fix", (0.5, 0.5)), (0.4, 0.6));
        // Interrogative short query keeps defaults.
        assert_eq!(adaptive_weights("congestion fix?", (0.5, 0.5)), (0.5, 0.5));
    }

    #[test]
    fn long_queries_keep_default_weights() {
        let q = "what is the recommended flow for congestion-aware placement";
        assert_eq!(adaptive_weights(q, (0.5, 0.5)), (0.5, 0.5));
    }

    /// Dense ranks [X, Y], sparse ranks [Y, Z], equal weights:
    /// X = 0.5/60, Y = 0.5/61 + 0.5/60, Z = 0.5/61 → order Y, X, Z.
    #[test]
    fn rrf_fusion_scores_and_order() {
        let x = chunk("a.pdf", "x_0");
        let y = chunk("a.pdf", "y_0");
        let z = chunk("b.pdf", "z_0");

        let fused = rrf_fuse(
            &[x.clone(), y.clone()],
            &[y.clone(), z.clone()],
            (0.5, 0.5),
            10,
        );

        let ids: Vec<&str> = fused.iter().map(|c| c.meta.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["y_0", "x_0", "z_0"]);
    }

    #[test]
    fn rrf_keys_match_across_modalities() {
        // The same chunk surfacing in both branches must merge, not
        // double-count as two results.
        let c = chunk("a.pdf", "c_0");
        let fused = rrf_fuse(&[c.clone()], &[c.clone()], (0.5, 0.5), 10);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn rrf_respects_weights() {
        let x = chunk("a.pdf", "x_0");
        let y = chunk("a.pdf", "y_0");
        // x leads dense, y leads sparse; lexical-heavy weights favor y.
        let fused = rrf_fuse(&[x.clone(), y.clone()], &[y.clone(), x.clone()], (0.3, 0.7), 10);
        assert_eq!(fused[0].meta.chunk_id, "y_0");
    }

    #[test]
    fn union_preserves_first_seen_order() {
        let a = chunk("f.pdf", "a_0");
        let b = chunk("f.pdf", "b_0");
        let c = chunk("f.pdf", "c_0");
        let merged = union_first_seen(vec![
            vec![a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ]);
        let ids: Vec<&str> = merged.iter().map(|m| m.meta.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a_0", "b_0", "c_0"]);
    }

    #[test]
    fn parse_multi_queries_keeps_original_first() {
        let response = "\
QUERY1: fusion compiler congestion repair commands
QUERY2: how do I reduce routing congestion?
not a query line
QUERY3: congestion optimization during place and route
";
        let queries = parse_multi_queries(response, "fix congestion");
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[0], "fix congestion");
    }

    #[test]
    fn parse_multi_queries_degrades_to_original() {
        let queries = parse_multi_queries("no structured output at all", "q");
        assert_eq!(queries, vec!["q".to_string()]);
    }

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::load_or_create(dir.path().join("tools_config.json")).unwrap();
        (dir, registry)
    }

    /// Query "pt timing" over candidates from pt/fc/icc2 manuals keeps all
    /// pt chunks as primary plus exactly one supplementary.
    #[test]
    fn source_priority_keeps_one_supplementary() {
        let (_dir, registry) = registry();
        let candidates = vec![
            chunk("pt_ug.pdf", "p_0"),
            chunk("fc_ug.pdf", "f_0"),
            chunk("icc2_ug.pdf", "i_0"),
            chunk("pt_ug.pdf", "p_1"),
        ];
        let filtered = apply_source_priority("pt timing", candidates, &registry);

        let sources: Vec<&str> = filtered.iter().map(|c| c.meta.source.as_str()).collect();
        assert_eq!(sources, vec!["pt_ug.pdf", "pt_ug.pdf", "fc_ug.pdf"]);
        assert_eq!(filtered[0].meta.source_role, SourceRole::Primary);
        assert_eq!(filtered[2].meta.source_role, SourceRole::Supplementary);
        let supplementary = filtered
            .iter()
            .filter(|c| c.meta.source_role == SourceRole::Supplementary)
            .count();
        assert_eq!(supplementary, 1);
    }

    #[test]
    fn no_tool_match_marks_everything_primary() {
        let (_dir, registry) = registry();
        let candidates = vec![chunk("fc_ug.pdf", "f_0"), chunk("icc2_ug.pdf", "i_0")];
        let filtered = apply_source_priority("generic placement question", candidates, &registry);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|c| c.meta.source_role == SourceRole::Primary));
    }
}
