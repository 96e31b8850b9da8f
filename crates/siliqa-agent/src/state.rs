use serde::{Deserialize, Serialize};
use siliqa_common::chunk::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Retrieve,
    NoRetrieval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeDecision {
    Relevant,
    NotRelevant,
}

/// Mutable state threaded through the controller nodes.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// Original user question (never rewritten).
    pub question: String,
    /// Query used for retrieval; replaced by the rewrite node.
    pub current_query: String,
    /// Retrieved child chunks. Grading never filters this set; it only
    /// steers the rewrite edge.
    pub documents: Vec<Chunk>,
    pub generation: String,
    /// Retrieval passes so far; bounded by the controller.
    pub iteration: usize,
    pub route_decision: RouteDecision,
    pub grade_decision: GradeDecision,
    /// Set when an external streaming generator runs instead of the
    /// generate node.
    pub skip_generate: bool,
}

impl AgentState {
    pub fn new(question: impl Into<String>, skip_generate: bool) -> Self {
        let question = question.into();
        Self {
            current_query: question.clone(),
            question,
            documents: Vec::new(),
            generation: String::new(),
            iteration: 0,
            route_decision: RouteDecision::Retrieve,
            grade_decision: GradeDecision::NotRelevant,
            skip_generate,
        }
    }
}
