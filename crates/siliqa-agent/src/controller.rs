//! The router → retrieve → grade → rewrite → generate state machine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use siliqa_common::Result;
use siliqa_llm::Message;
use siliqa_retrieval::{RagEngine, SourceRef, StreamEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::prompts::{GRADE_PROMPT, REWRITE_PROMPT, ROUTER_PROMPT};
use crate::state::{AgentState, GradeDecision, RouteDecision};

/// Hard bound on retrieval passes; guarantees termination.
pub const MAX_ITERATIONS: usize = 3;
/// Grading only sees the head of each child chunk.
const GRADE_SNIPPET_LEN: usize = 1000;
/// Grading calls are small; they get a tighter deadline than generation.
const GRADE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Router,
    Retrieve,
    Grade,
    Rewrite,
    Generate,
    End,
}

pub struct AgenticController {
    engine: Arc<RagEngine>,
    max_iterations: usize,
}

impl AgenticController {
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine, max_iterations: MAX_ITERATIONS }
    }

    /// Step the state machine to completion.
    pub async fn run(&self, question: &str, skip_generate: bool) -> Result<AgentState> {
        let mut state = AgentState::new(question, skip_generate);
        let mut node = Node::Router;

        while node != Node::End {
            node = match node {
                Node::Router => {
                    self.router(&mut state).await;
                    match state.route_decision {
                        RouteDecision::Retrieve => Node::Retrieve,
                        RouteDecision::NoRetrieval => Node::Generate,
                    }
                }
                Node::Retrieve => {
                    self.retrieve(&mut state).await?;
                    Node::Grade
                }
                Node::Grade => {
                    self.grade(&mut state).await;
                    if state.grade_decision == GradeDecision::Relevant
                        || state.iteration >= self.max_iterations
                    {
                        Node::Generate
                    } else {
                        Node::Rewrite
                    }
                }
                Node::Rewrite => {
                    self.rewrite(&mut state).await;
                    Node::Retrieve
                }
                Node::Generate => {
                    self.generate(&mut state).await?;
                    Node::End
                }
                Node::End => Node::End,
            };
        }

        Ok(state)
    }

    /// Classify the question; a failed call defaults to retrieval.
    async fn router(&self, state: &mut AgentState) {
        let prompt = ROUTER_PROMPT.replace("{question}", &state.question);
        state.route_decision = match self.engine.chat_provider().chat(&[Message::user(prompt)]).await
        {
            // "no_retrieval" does not contain the substring "retrieve", so a
            // plain substring check decides the edge.
            Ok(decision) if decision.to_lowercase().contains("retrieve") => RouteDecision::Retrieve,
            Ok(_) => RouteDecision::NoRetrieval,
            Err(e) => {
                warn!(error = %e, "router call failed, defaulting to retrieval");
                RouteDecision::Retrieve
            }
        };
        info!(decision = ?state.route_decision, "router decision");
    }

    /// Retrieval stages 1–5 against the current query. Parent expansion is
    /// deferred to generation so the grader sees focused child chunks.
    async fn retrieve(&self, state: &mut AgentState) -> Result<()> {
        state.documents = self.engine.retrieve(&state.current_query).await?;
        state.iteration += 1;
        info!(
            iteration = state.iteration,
            documents = state.documents.len(),
            "retrieval pass complete"
        );
        Ok(())
    }

    /// Judge each retrieved child; at least one `yes` makes the set
    /// relevant. The document set itself is never filtered here.
    async fn grade(&self, state: &mut AgentState) {
        if state.documents.is_empty() {
            state.grade_decision = GradeDecision::NotRelevant;
            warn!("no documents retrieved");
            return;
        }

        let chat = self.engine.chat_provider();
        let mut any_relevant = false;

        for (i, document) in state.documents.iter().enumerate() {
            let snippet: String = document.content.chars().take(GRADE_SNIPPET_LEN).collect();
            let prompt = GRADE_PROMPT
                .replace("{question}", &state.current_query)
                .replace("{document_snippet}", &snippet);

            match chat.chat_with_timeout(&[Message::user(prompt)], GRADE_TIMEOUT).await {
                Ok(response) => {
                    let relevant = parse_grade(&response);
                    info!(doc = i + 1, relevant, "document graded");
                    any_relevant |= relevant;
                }
                Err(e) => warn!(doc = i + 1, error = %e, "grading call failed"),
            }
        }

        state.grade_decision = if any_relevant {
            GradeDecision::Relevant
        } else {
            GradeDecision::NotRelevant
        };
    }

    /// Reformulate the query; a failed call keeps the current one.
    async fn rewrite(&self, state: &mut AgentState) {
        let prompt = REWRITE_PROMPT
            .replace("{original_question}", &state.question)
            .replace("{current_query}", &state.current_query);

        match self.engine.chat_provider().chat(&[Message::user(prompt)]).await {
            Ok(rewritten) => {
                let rewritten = rewritten.trim();
                if !rewritten.is_empty() {
                    info!(query = %rewritten, "query rewritten");
                    state.current_query = rewritten.to_string();
                }
            }
            Err(e) => warn!(error = %e, "rewrite call failed, keeping current query"),
        }
    }

    /// Produce the final answer over expanded parents, unless an external
    /// streaming generator runs instead.
    async fn generate(&self, state: &mut AgentState) -> Result<()> {
        if state.skip_generate {
            state.generation.clear();
            return Ok(());
        }

        let messages = self.generation_messages(state);
        state.generation = self
            .engine
            .chat_provider()
            .chat(&messages)
            .await
            .map_err(|e| siliqa_common::SiliqaError::Provider(e.to_string()))?;
        info!(chars = state.generation.len(), "answer generated");
        Ok(())
    }

    fn generation_messages(&self, state: &AgentState) -> Vec<Message> {
        if state.route_decision == RouteDecision::NoRetrieval || state.documents.is_empty() {
            vec![
                Message::system("You are a helpful digital-backend engineering assistant."),
                Message::user(state.question.clone()),
            ]
        } else {
            self.engine.build_generation_messages(&state.question, &state.documents)
        }
    }
}

/// Robust grade parsing: strip common code fences, parse `{score, reason}`,
/// fall back to a substring check on the raw response.
pub fn parse_grade(response: &str) -> bool {
    let stripped = response.replace("```json", "").replace("```", "");
    let stripped = stripped.trim();

    #[derive(Deserialize)]
    struct Grade {
        score: String,
        #[allow(dead_code)]
        #[serde(default)]
        reason: String,
    }

    match serde_json::from_str::<Grade>(stripped) {
        Ok(grade) => grade.score.to_lowercase().contains("yes"),
        Err(_) => response.to_lowercase().contains("yes"),
    }
}

// ── Public query surface ──────────────────────────────────────────────────────

/// Non-streaming agentic answer, with loop telemetry for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub conversation_id: String,
    pub iterations: usize,
    pub route: RouteDecision,
}

/// Agentic entry points mirroring the linear engine surface.
pub struct AgenticRag {
    engine: Arc<RagEngine>,
}

impl AgenticRag {
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine }
    }

    /// Run the loop and return the final answer with sources and telemetry.
    pub async fn query(
        &self,
        question: String,
        conversation_id: Option<String>,
    ) -> Result<AgenticResponse> {
        let conversation_id = self.engine.ensure_conversation(conversation_id)?;
        self.engine.record_exchange_user(&conversation_id, &question);

        let controller = AgenticController::new(Arc::clone(&self.engine));
        let state = controller.run(&question, false).await?;

        let sources: Vec<SourceRef> = state.documents.iter().map(SourceRef::from_chunk).collect();
        self.engine
            .record_exchange_assistant(&conversation_id, &question, &state.generation, &sources);

        Ok(AgenticResponse {
            answer: state.generation,
            sources,
            conversation_id,
            iterations: state.iteration,
            route: state.route_decision,
        })
    }

    /// Streaming variant: the loop runs with generation skipped, then the
    /// answer streams over the same event protocol as the linear pipeline.
    pub fn query_stream(
        &self,
        question: String,
        conversation_id: Option<String>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(e) = run_agentic_stream(engine, question, conversation_id, &tx).await {
                let _ = tx.send(StreamEvent::Error { content: e.to_string() }).await;
            }
        });
        rx
    }
}

async fn run_agentic_stream(
    engine: Arc<RagEngine>,
    question: String,
    conversation_id: Option<String>,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<()> {
    let conversation_id = engine.ensure_conversation(conversation_id)?;
    engine.record_exchange_user(&conversation_id, &question);

    let controller = AgenticController::new(Arc::clone(&engine));
    let state = controller.run(&question, true).await?;

    let sources: Vec<SourceRef> = state.documents.iter().map(SourceRef::from_chunk).collect();
    if tx
        .send(StreamEvent::Metadata {
            conversation_id: conversation_id.clone(),
            sources: sources.clone(),
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    let messages = if state.route_decision == RouteDecision::NoRetrieval || state.documents.is_empty()
    {
        vec![
            Message::system("You are a helpful digital-backend engineering assistant."),
            Message::user(question.clone()),
        ]
    } else {
        engine.build_generation_messages(&question, &state.documents)
    };

    let mut answer = String::new();
    match engine.chat_provider().stream(&messages).await {
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

    engine.record_exchange_assistant(&conversation_id, &question, &answer, &sources);
    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siliqa_config::Settings;
    use siliqa_llm::{ChatProvider, EmbeddingProvider, LlmError, TokenStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parse_grade_accepts_plain_json() {
        assert!(parse_grade(r#"{"score": "yes", "reason": "mentions the command"}"#));
        assert!(!parse_grade(r#"{"score": "no", "reason": "different tool"}"#));
    }

    #[test]
    fn parse_grade_strips_code_fences() {
        let fenced = "```json\n{\"score\": \"yes\", \"reason\": \"ok\"}\n```";
        assert!(parse_grade(fenced));
    }

    #[test]
    fn parse_grade_falls_back_to_substring() {
        assert!(parse_grade("I think the answer is yes, it is relevant"));
        assert!(!parse_grade("definitely not relevant"));
    }

    /// Scripted chat provider: routes to retrieval, never finds documents
    /// relevant, answers generation requests with a fixed string.
    struct ScriptedChat {
        grade_calls: AtomicUsize,
    }

    impl ScriptedChat {
        fn new() -> Self {
            Self { grade_calls: AtomicUsize::new(0) }
        }

        fn answer_for(&self, prompt: &str) -> String {
            if prompt.contains("Answer with exactly one word") {
                "retrieve".to_string()
            } else if prompt.contains("Reply with JSON only") {
                self.grade_calls.fetch_add(1, Ordering::SeqCst);
                r#"{"score": "no", "reason": "unrelated"}"#.to_string()
            } else if prompt.contains("Rewritten query") {
                "rewritten query".to_string()
            } else if prompt.contains("QUERY1") {
                "unstructured".to_string()
            } else {
                "final answer".to_string()
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedChat {
        async fn chat(&self, messages: &[Message]) -> std::result::Result<String, LlmError> {
            let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            Ok(self.answer_for(prompt))
        }

        async fn chat_with_timeout(
            &self,
            messages: &[Message],
            _timeout: Duration,
        ) -> std::result::Result<String, LlmError> {
            self.chat(messages).await
        }

        async fn stream(
            &self,
            _messages: &[Message],
        ) -> std::result::Result<TokenStream, LlmError> {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx.send(Ok("streamed".to_string())).await;
            });
            Ok(rx)
        }
    }

    struct HashEmbedder;

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, LlmError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn engine_with(chat: Arc<dyn ChatProvider>, dir: &std::path::Path) -> Arc<RagEngine> {
        let mut settings = Settings::from_env();
        settings.persist_dir = dir.to_path_buf();
        settings.rerank_enabled = false;
        RagEngine::with_providers(settings, chat, Arc::new(HashEmbedder), None).unwrap()
    }

    /// Grading never passes, so the loop must stop at MAX_ITERATIONS and
    /// still generate from the last retrieved set.
    #[tokio::test]
    async fn loop_terminates_at_max_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(ScriptedChat::new());
        let engine = engine_with(chat.clone(), dir.path());

        // Give retrieval something to return so grading actually runs.
        let md = dir.path().join("doc.md");
        std::fs::write(&md, "# T\n\nsome indexed body text\n").unwrap();
        engine.ingest_document(&md, "doc.md").await.unwrap();

        let controller = AgenticController::new(engine);
        let state = controller.run("irrelevant question", false).await.unwrap();

        assert_eq!(state.iteration, MAX_ITERATIONS);
        assert_eq!(state.grade_decision, GradeDecision::NotRelevant);
        assert_eq!(state.generation, "final answer");
        // Grading ran on every iteration but never emptied the documents.
        assert!(!state.documents.is_empty());
        assert!(chat.grade_calls.load(Ordering::SeqCst) >= MAX_ITERATIONS);
    }

    struct NoRetrievalChat;

    #[async_trait]
    impl ChatProvider for NoRetrievalChat {
        async fn chat(&self, messages: &[Message]) -> std::result::Result<String, LlmError> {
            let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            if prompt.contains("Answer with exactly one word") {
                Ok("no_retrieval".to_string())
            } else {
                Ok("direct answer".to_string())
            }
        }

        async fn chat_with_timeout(
            &self,
            messages: &[Message],
            _timeout: Duration,
        ) -> std::result::Result<String, LlmError> {
            self.chat(messages).await
        }

        async fn stream(
            &self,
            _messages: &[Message],
        ) -> std::result::Result<TokenStream, LlmError> {
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn no_retrieval_route_skips_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(NoRetrievalChat), dir.path());

        let controller = AgenticController::new(engine);
        let state = controller.run("hello there", false).await.unwrap();

        assert_eq!(state.route_decision, RouteDecision::NoRetrieval);
        assert_eq!(state.iteration, 0);
        assert!(state.documents.is_empty());
        assert_eq!(state.generation, "direct answer");
    }

    #[tokio::test]
    async fn skip_generate_leaves_generation_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(ScriptedChat::new()), dir.path());

        let controller = AgenticController::new(engine);
        let state = controller.run("question", true).await.unwrap();
        assert!(state.generation.is_empty());
    }
}
