//! Lexical query classification
//!
//! Produces a `QueryPlan` deciding how much each retrieval source counts.
//! Classification is purely lexical and deterministic: the same query always
//! yields the same plan. Signal precedence: hybrid phrase, then identifier,
//! then concept, then pronoun; explicit mode overrides apply last.

use serde::{Deserialize, Serialize};

/// Forced retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Vector index only
    Semantic,
    /// Graph lookup only
    Structured,
    /// All sources, weighted by classification
    Hybrid,
}

/// Pronouns that pull weight toward the conversation source
const PRONOUNS: &[&str] = &["it", "that", "this", "he", "she", "they", "them"];

/// Words that signal an identifier/entity lookup
const IDENTIFIER_WORDS: &[&str] = &["uuid", "id", "named", "who", "when"];

/// Words that signal a conceptual/semantic query
const CONCEPT_WORDS: &[&str] = &["what", "how", "why", "about", "like", "similar", "related"];

/// Phrases that request the full hybrid treatment
const HYBRID_PHRASES: &[&str] = &["everything about", "full context", "all information"];

/// Default weights: (vector, graph, conversation)
const DEFAULT_WEIGHTS: (f64, f64, f64) = (0.5, 0.4, 0.1);

/// Source weighting produced by classification; weights sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub vector_weight: f64,
    pub graph_weight: f64,
    pub conversation_weight: f64,
    pub mode: SearchMode,
}

impl QueryPlan {
    fn normalized(mut self) -> Self {
        let sum = self.vector_weight + self.graph_weight + self.conversation_weight;
        if sum > 0.0 {
            self.vector_weight /= sum;
            self.graph_weight /= sum;
            self.conversation_weight /= sum;
        } else {
            let (v, g, c) = DEFAULT_WEIGHTS;
            self.vector_weight = v;
            self.graph_weight = g;
            self.conversation_weight = c;
        }
        self
    }

    /// Raise one weight to at least `floor`, rescaling the other two
    /// proportionally into the remaining mass.
    fn with_floor(mut self, which: Raise, floor: f64) -> Self {
        let (target, other_a, other_b) = match which {
            Raise::Vector => (
                &mut self.vector_weight,
                &mut self.graph_weight,
                &mut self.conversation_weight,
            ),
            Raise::Graph => (
                &mut self.graph_weight,
                &mut self.vector_weight,
                &mut self.conversation_weight,
            ),
            Raise::Conversation => (
                &mut self.conversation_weight,
                &mut self.vector_weight,
                &mut self.graph_weight,
            ),
        };
        if *target >= floor {
            return self;
        }
        let remaining = 1.0 - floor;
        let others = *other_a + *other_b;
        if others > 0.0 {
            *other_a *= remaining / others;
            *other_b *= remaining / others;
        } else {
            *other_a = remaining / 2.0;
            *other_b = remaining / 2.0;
        }
        *target = floor;
        self
    }
}

enum Raise {
    Vector,
    Graph,
    Conversation,
}

fn words(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_any(words: &[String], needles: &[&str]) -> bool {
    words.iter().any(|w| needles.contains(&w.as_str()))
}

/// Whether a token looks like the head of a UUID (`xxxxxxxx-xxxx-`)
fn looks_like_uuid(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() < 14 {
        return false;
    }
    let hex = |b: &u8| b.is_ascii_hexdigit() && !b.is_ascii_uppercase();
    bytes[..8].iter().all(hex)
        && bytes[8] == b'-'
        && bytes[9..13].iter().all(hex)
        && bytes[13] == b'-'
}

/// Classify a query into a weighting plan.
///
/// `forced_mode` comes from the caller's options: `Semantic` forces
/// (1, 0, 0), `Structured` forces (0, 1, 0), `Hybrid` (or `None`) uses the
/// lexical weights. `include_conversation=false` zeroes the conversation
/// weight and renormalizes.
pub fn classify_query(
    query: &str,
    forced_mode: Option<SearchMode>,
    include_conversation: bool,
) -> QueryPlan {
    let lowered = query.to_lowercase();
    let query_words = words(&lowered);

    let hybrid_phrase = HYBRID_PHRASES.iter().any(|p| lowered.contains(p));
    let identifier = contains_any(&query_words, IDENTIFIER_WORDS)
        || query_words.iter().any(|w| looks_like_uuid(w));
    let concept = contains_any(&query_words, CONCEPT_WORDS);
    let pronoun = contains_any(&query_words, PRONOUNS);

    let (v, g, c) = DEFAULT_WEIGHTS;
    let mut plan = QueryPlan {
        vector_weight: v,
        graph_weight: g,
        conversation_weight: c,
        mode: SearchMode::Hybrid,
    };

    if !hybrid_phrase {
        if identifier {
            plan = plan.with_floor(Raise::Graph, 0.7);
        } else if concept {
            plan = plan.with_floor(Raise::Vector, 0.7);
        }
        if pronoun && include_conversation {
            plan = plan.with_floor(Raise::Conversation, 0.5);
        }
    }

    match forced_mode {
        Some(SearchMode::Semantic) => {
            plan.vector_weight = 1.0;
            plan.graph_weight = 0.0;
            plan.conversation_weight = 0.0;
            plan.mode = SearchMode::Semantic;
        }
        Some(SearchMode::Structured) => {
            plan.vector_weight = 0.0;
            plan.graph_weight = 1.0;
            plan.conversation_weight = 0.0;
            plan.mode = SearchMode::Structured;
        }
        Some(SearchMode::Hybrid) | None => {
            plan.mode = SearchMode::Hybrid;
        }
    }

    if !include_conversation {
        plan.conversation_weight = 0.0;
        plan = plan.normalized();
    }

    plan.normalized()
}

// ============================================================================
// TESTS
// ============================================================================
