//! Hybrid retrieval
//!
//! Query classification ([`classify`]), score normalization and fusion
//! ([`fusion`]), and the orchestrator that dispatches the vector, graph, and
//! conversation retrievals in parallel and merges them into one ranked list.

pub mod classify;
pub mod fusion;
mod orchestrator;

pub use classify::{classify_query, QueryPlan, SearchMode};
pub use fusion::{min_max_normalize, sort_ranked};
pub use orchestrator::Orchestrator;

use serde::{Deserialize, Serialize};

use crate::memory::Memory;

/// Caller-supplied retrieval options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    /// Result budget; clamped to `[1, retrieval_max_limit]`
    pub limit: Option<usize>,
    /// Forced mode; `None` lets classification decide
    pub mode: Option<SearchMode>,
    /// Semantic similarity floor; defaults from configuration
    pub min_similarity: Option<f32>,
    /// Whether session context participates (default true)
    pub include_conversation: Option<bool>,
    pub session_id: Option<String>,
    /// Overall deadline override, milliseconds
    pub deadline_ms: Option<u64>,
}

impl SearchOptions {
    pub fn include_conversation(&self) -> bool {
        self.include_conversation.unwrap_or(true)
    }
}

/// Which retrieval source produced (or dominated) a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Vector,
    Graph,
    Conversation,
    Merged,
}

/// Per-source normalized contributions of one result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<f64>,
    /// Temporal strength multiplier applied to the weighted sum
    pub strength: f64,
}

impl SubScores {
    /// The dominant source, or `Merged` when several contributed
    pub fn source(&self) -> Source {
        let present = [
            self.vector.map(|_| Source::Vector),
            self.graph.map(|_| Source::Graph),
            self.conversation.map(|_| Source::Conversation),
        ];
        let mut sources = present.into_iter().flatten();
        match (sources.next(), sources.next()) {
            (Some(single), None) => single,
            (Some(_), Some(_)) => Source::Merged,
            _ => Source::Merged,
        }
    }
}

/// One ranked retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub memory: Memory,
    /// Final fused score
    pub score: f64,
    pub source: Source,
    pub sub_scores: SubScores,
}

/// A full retrieval response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// True when a source was degraded or timed out
    pub partial: bool,
    /// The plan classification produced for this query
    pub plan: QueryPlan,
}
