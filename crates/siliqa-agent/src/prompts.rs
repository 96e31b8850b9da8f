//! Prompts for the agentic loop nodes.

/// One-word classification; the edge is decided by substring match on
/// `retrieve`.
pub const ROUTER_PROMPT: &str = "\
Classify the user question for a technical documentation assistant.

Answer with exactly one word:
- retrieve     — the question needs facts from EDA tool documentation
- no_retrieval — greetings, chit-chat, or questions answerable without documents

Question: {question}

Answer:";

/// Per-document relevance judgement; strict JSON requested, but the caller
/// tolerates fenced or malformed output.
pub const GRADE_PROMPT: &str = "\
You are grading whether a retrieved document snippet is relevant to a user
question about EDA tools.

Question: {question}

Document snippet:
{document_snippet}

Reply with JSON only, no other text:
{\"score\": \"yes\" or \"no\", \"reason\": \"one short sentence\"}";

/// Query reformulation after a failed retrieval round.
pub const REWRITE_PROMPT: &str = "\
The retrieval below found no relevant documents. Rewrite the query to improve
retrieval: expand abbreviations, add synonyms, and make the intent explicit.
Reply with the rewritten query only.

Original question: {original_question}
Current query: {current_query}

Rewritten query:";
