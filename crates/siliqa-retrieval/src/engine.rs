//! The query orchestrator: owns the indices, providers and durable maps,
//! exposes ingest/delete/list plus the streaming query entry points.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use siliqa_common::chunk::{Chunk, ParentDocument, SourceRole};
use siliqa_common::{Result, SiliqaError};
use siliqa_config::Settings;
use siliqa_history::ChatHistoryDb;
use siliqa_index::{tokenizer, Bm25Index, ParentStore, VectorStore};
use siliqa_ingest::{markdown, pdf, ParsedDocument};
use siliqa_llm::{ChatProvider, EmbeddingProvider, Message, OpenAiCompatClient, RerankProvider};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::events::{SourceRef, StreamEvent};
use crate::expand::expand_to_parents;
use crate::hybrid::HybridRetriever;
use crate::prompts::GENERATION_SYSTEM_PROMPT;
use crate::tools::{ToolEntry, ToolRegistry};

const BM25_CACHE_FILE: &str = "bm25_index.json";

/// Extension dispatch for the parsers. `Ok(None)` marks a garbled/scanned
/// PDF that should be skipped without error.
fn parse_document(
    path: &Path,
    filename: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Option<ParsedDocument>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => {
            match pdf::scan_quality(path)? {
                pdf::PdfQuality::Clean => {}
                pdf::PdfQuality::Garbled(reason) => {
                    warn!(file = filename, reason = %reason, "garbled PDF skipped");
                    return Ok(None);
                }
                pdf::PdfQuality::Scanned => {
                    warn!(file = filename, "scanned/empty PDF skipped");
                    return Ok(None);
                }
            }
            let structured = pdf::parse(path, filename)?;
            if structured.is_empty() {
                info!(file = filename, "falling back to flat chunking");
                Ok(Some(pdf::parse_flat(path, filename, chunk_size, chunk_overlap)?))
            } else {
                Ok(Some(structured))
            }
        }
        "md" | "markdown" => {
            Ok(Some(markdown::parse(path, filename, chunk_size, chunk_overlap)?))
        }
        other => Err(SiliqaError::InvalidInput(format!("unsupported file type: .{other}"))),
    }
}

/// Corpus listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub chunks: usize,
}

/// Non-streaming answer payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub conversation_id: String,
}

pub struct RagEngine {
    settings: Settings,
    chat: Arc<dyn ChatProvider>,
    reranker: Option<Arc<dyn RerankProvider>>,
    vector: Arc<VectorStore>,
    bm25: Arc<Mutex<Bm25Index>>,
    parents: Arc<ParentStore>,
    tools: Arc<ToolRegistry>,
    history: Arc<ChatHistoryDb>,
    /// Best-effort per-process accelerator; the history log is the durable
    /// truth.
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl RagEngine {
    /// Build the engine with providers resolved from settings.
    pub fn new(settings: Settings) -> Result<Arc<Self>> {
        let chat: Arc<dyn ChatProvider> = Arc::new(OpenAiCompatClient::new(
            settings.chat.api_base.clone(),
            settings.chat.api_key.clone(),
            settings.chat.model.clone(),
        ));
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiCompatClient::new(
            settings.embedding.api_base.clone(),
            settings.embedding.api_key.clone(),
            settings.embedding.model.clone(),
        ));
        let reranker: Option<Arc<dyn RerankProvider>> = settings.rerank_enabled.then(|| {
            Arc::new(OpenAiCompatClient::new(
                settings.embedding.api_base.clone(),
                settings.embedding.api_key.clone(),
                settings.rerank_model.clone(),
            )) as Arc<dyn RerankProvider>
        });
        Self::with_providers(settings, chat, embedder, reranker)
    }

    /// Build the engine around explicit providers (used by tests and by any
    /// embedding/chat stack the deployment wires in).
    pub fn with_providers(
        settings: Settings,
        chat: Arc<dyn ChatProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn RerankProvider>>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&settings.persist_dir)?;

        let dict_path = settings.domain_dict_path();
        tokenizer::configure_dictionary(dict_path.exists().then_some(dict_path.as_path()));

        let vector = Arc::new(VectorStore::open(&settings.persist_dir, embedder)?);

        let cache_path = settings.persist_dir.join(BM25_CACHE_FILE);
        let bm25 = match Bm25Index::load(&cache_path, vector.count()) {
            Some(index) => {
                info!(count = index.len(), "lexical index loaded from cache");
                index
            }
            None => {
                let mut index = Bm25Index::new();
                let documents = vector.all_documents();
                if !documents.is_empty() {
                    index.add(&documents);
                    if let Err(e) = index.persist(&cache_path) {
                        warn!(error = %e, "lexical cache write failed");
                    }
                }
                info!(count = index.len(), "lexical index rebuilt from vector store");
                index
            }
        };

        let parents = Arc::new(ParentStore::load(settings.parent_docs_path())?);
        let tools = Arc::new(ToolRegistry::load_or_create(settings.tools_config_path())?);
        let history = Arc::new(ChatHistoryDb::open(settings.history_db_path())?);

        info!(
            chat_model = %settings.chat.model,
            embedding_model = %settings.embedding.model,
            rerank = settings.rerank_enabled,
            top_k = settings.retrieval_top_k,
            top_n = settings.rerank_top_n,
            "RAG engine initialized"
        );

        Ok(Arc::new(Self {
            settings,
            chat,
            reranker,
            vector,
            bm25: Arc::new(Mutex::new(bm25)),
            parents,
            tools,
            history,
            conversations: RwLock::new(HashMap::new()),
        }))
    }

    pub fn is_ready(&self) -> bool {
        // Stores are constructed in `new`; readiness mirrors their presence.
        true
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &ChatHistoryDb {
        &self.history
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn chat_provider(&self) -> Arc<dyn ChatProvider> {
        Arc::clone(&self.chat)
    }

    fn bm25_cache_path(&self) -> std::path::PathBuf {
        self.settings.persist_dir.join(BM25_CACHE_FILE)
    }

    fn retriever(&self) -> HybridRetriever {
        HybridRetriever {
            vector: Arc::clone(&self.vector),
            bm25: Arc::clone(&self.bm25),
            chat: Arc::clone(&self.chat),
            reranker: self.reranker.clone(),
            tools: Arc::clone(&self.tools),
            top_k: self.settings.retrieval_top_k,
            top_n: self.settings.rerank_top_n,
            default_weights: (self.settings.vector_weight, self.settings.bm25_weight),
        }
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Parse and index one document; returns the number of chunks created.
    /// Garbled/scanned PDFs are skipped with zero chunks and no error.
    /// Parsing is CPU-bound and runs on the blocking pool so it never stalls
    /// the request event loop.
    pub async fn ingest_document(&self, path: &Path, filename: &str) -> Result<usize> {
        let path = path.to_path_buf();
        let filename_owned = filename.to_string();
        let chunk_size = self.settings.chunk_size;
        let chunk_overlap = self.settings.chunk_overlap;

        let parsed: Option<ParsedDocument> = tokio::task::spawn_blocking(move || {
            parse_document(&path, &filename_owned, chunk_size, chunk_overlap)
        })
        .await
        .map_err(|e| SiliqaError::Parse(format!("parser task failed: {e}")))??;

        let Some(parsed) = parsed else {
            // Garbled or scanned PDF; reported and skipped upstream.
            return Ok(0);
        };

        if parsed.chunks.is_empty() {
            return Ok(0);
        }
        let chunk_count = parsed.chunks.len();

        // Re-ingesting a file replaces it; chunk ids stay unique across the
        // corpus.
        if !self.vector.ids_for_source(filename).is_empty() {
            self.delete_document(filename).await?;
        }

        self.parents.insert_source(filename, parsed.parents)?;
        self.vector.add(&parsed.chunks).await?;
        {
            let mut bm25 = self.bm25.lock().expect("bm25 lock poisoned");
            bm25.add(&parsed.chunks);
            if let Err(e) = bm25.persist(&self.bm25_cache_path()) {
                warn!(error = %e, "lexical cache write failed");
            }
        }

        info!(file = filename, chunks = chunk_count, "document ingested");
        Ok(chunk_count)
    }

    /// Remove a document from every index; false when it was not present.
    pub async fn delete_document(&self, filename: &str) -> Result<bool> {
        let ids = self.vector.ids_for_source(filename);
        let had_parents = self.parents.remove_source(filename)?;
        if ids.is_empty() && !had_parents {
            return Ok(false);
        }

        self.vector.delete_ids(&ids)?;
        {
            let mut bm25 = self.bm25.lock().expect("bm25 lock poisoned");
            bm25.remove_source(filename);
            if let Err(e) = bm25.persist(&self.bm25_cache_path()) {
                warn!(error = %e, "lexical cache write failed");
            }
        }

        info!(file = filename, chunks = ids.len(), "document deleted");
        Ok(true)
    }

    pub fn list_documents(&self) -> Vec<DocumentInfo> {
        self.vector
            .sources()
            .into_iter()
            .map(|(filename, chunks)| DocumentInfo { filename, chunks })
            .collect()
    }

    /// Admin surface: wipe the whole corpus (indices + parent map).
    pub async fn clear_all(&self) -> Result<()> {
        self.vector.clear()?;
        {
            let mut bm25 = self.bm25.lock().expect("bm25 lock poisoned");
            bm25.clear(&self.bm25_cache_path());
        }
        self.parents.clear()?;
        info!("knowledge base cleared");
        Ok(())
    }

    /// Scan the corpus for sources no tool claims and extend the registry.
    pub fn discover_tools(&self) -> Result<Vec<ToolEntry>> {
        self.tools.discover(&self.parents.sources())
    }

    // ── Retrieval and generation ─────────────────────────────────────────────

    /// Retrieval stages 1–5 (no parent expansion).
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        self.retriever().retrieve(query).await
    }

    /// Stage 6, run just before generation.
    pub fn expand_parents(&self, children: &[Chunk]) -> Vec<ParentDocument> {
        expand_to_parents(children, &self.parents)
    }

    /// Context assembly with per-snippet headers (tool label, source file,
    /// role tag).
    pub fn format_context(&self, parents: &[ParentDocument]) -> String {
        if parents.is_empty() {
            return "No relevant context available.".to_string();
        }
        let mut blocks = Vec::with_capacity(parents.len());
        for (i, parent) in parents.iter().enumerate() {
            let tool = self.tools.label_for_source(&parent.source);
            let role_tag = match parent.source_role {
                SourceRole::Primary => "primary source",
                SourceRole::Supplementary => "supplementary reference (other tool)",
            };
            blocks.push(format!(
                "[{n}] Tool: {tool} | Source: {source} | {role_tag}\n{content}\n",
                n = i + 1,
                source = parent.source,
                content = parent.content,
            ));
        }
        blocks.join("\n")
    }

    /// System+user messages for generation over the expanded parents.
    pub fn build_generation_messages(&self, question: &str, children: &[Chunk]) -> Vec<Message> {
        let parents = self.expand_parents(children);
        let context = self.format_context(&parents);
        vec![
            Message::system(GENERATION_SYSTEM_PROMPT.replace("{context}", &context)),
            Message::user(question),
        ]
    }

    // ── Conversation plumbing ────────────────────────────────────────────────

    /// Resolve or create the conversation id.
    pub fn ensure_conversation(&self, conversation_id: Option<String>) -> Result<String> {
        match conversation_id {
            Some(id) => Ok(id),
            None => self.history.create_conversation("New Chat"),
        }
    }

    /// Append the user message to the history log; failures are logged, not
    /// fatal (a later retry re-persists).
    pub fn record_exchange_user(&self, conversation_id: &str, question: &str) {
        if let Err(e) = self.history.add_message(conversation_id, "user", question, None) {
            warn!(error = %e, "history write failed (user message)");
        }
    }

    /// Append the assistant message (with its source list) to the history
    /// log and the in-memory cache.
    pub fn record_exchange_assistant(
        &self,
        conversation_id: &str,
        question: &str,
        answer: &str,
        sources: &[SourceRef],
    ) {
        let sources_json = serde_json::to_value(sources).ok();
        if let Err(e) =
            self.history
                .add_message(conversation_id, "assistant", answer, sources_json.as_ref())
        {
            warn!(error = %e, "history write failed (assistant message)");
        }

        let mut cache = self.conversations.write().expect("conversation cache poisoned");
        let entry = cache.entry(conversation_id.to_string()).or_default();
        entry.push(Message::user(question));
        entry.push(Message::assistant(answer));
    }

    /// In-memory view of a conversation (accelerator only).
    pub fn cached_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .read()
            .expect("conversation cache poisoned")
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    // ── Query entry points ───────────────────────────────────────────────────

    /// Linear RAG, streaming. Event order: `metadata`, `content*`, then
    /// `done` (or `error`, terminating the stream).
    pub fn query_stream(
        self: &Arc<Self>,
        question: String,
        conversation_id: Option<String>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.run_linear(&question, conversation_id, &tx).await {
                let _ = tx.send(StreamEvent::Error { content: e.to_string() }).await;
            }
        });
        rx
    }

    async fn run_linear(
        &self,
        question: &str,
        conversation_id: Option<String>,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let conversation_id = self.ensure_conversation(conversation_id)?;
        self.record_exchange_user(&conversation_id, question);

        let children = self.retrieve(question).await?;
        let sources: Vec<SourceRef> = children.iter().map(SourceRef::from_chunk).collect();

        if tx
            .send(StreamEvent::Metadata {
                conversation_id: conversation_id.clone(),
                sources: sources.clone(),
            })
            .await
            .is_err()
        {
            return Ok(()); // client went away
        }

        let messages = self.build_generation_messages(question, &children);
        let mut answer = String::new();

        match self.chat.stream(&messages).await {
            Ok(mut stream) => {
                while let Some(item) = stream.recv().await {
                    match item {
                        Ok(fragment) => {
                            answer.push_str(&fragment);
                            if tx.send(StreamEvent::Content { content: fragment }).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(StreamEvent::Error { content: e.to_string() }).await;
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error { content: e.to_string() }).await;
                return Ok(());
            }
        }

        self.record_exchange_assistant(&conversation_id, question, &answer, &sources);
        let _ = tx.send(StreamEvent::Done).await;
        Ok(())
    }

    /// Linear RAG, non-streaming: fold of the stream.
    pub async fn query(
        self: &Arc<Self>,
        question: String,
        conversation_id: Option<String>,
    ) -> Result<QueryResponse> {
        let mut rx = self.query_stream(question, conversation_id);
        let mut response = QueryResponse {
            answer: String::new(),
            sources: Vec::new(),
            conversation_id: String::new(),
        };
        let mut error: Option<String> = None;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Metadata { conversation_id, sources } => {
                    response.conversation_id = conversation_id;
                    response.sources = sources;
                }
                StreamEvent::Content { content } => response.answer.push_str(&content),
                StreamEvent::Error { content } => error = Some(content),
                StreamEvent::Done => {}
            }
        }

        match error {
            Some(message) if response.answer.is_empty() => Err(SiliqaError::Provider(message)),
            _ => Ok(response),
        }
    }
}
