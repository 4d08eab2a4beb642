//! Memory record and its closed classification vocabulary
//!
//! `layer`, `sublayer`, `kind`, `status`, and `rel_type` are closed tagged
//! variants. New values require a schema bump; nothing in the engine does
//! runtime type reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// LAYER / SUBLAYER
// ============================================================================

/// Top-level epistemic classification of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Knowledge about the agent itself
    SelfLayer,
    /// Knowledge about the world
    #[default]
    World,
    /// Standing intentions, rules, and goals
    Intent,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::SelfLayer => "self",
            Layer::World => "world",
            Layer::Intent => "intent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "self" => Some(Layer::SelfLayer),
            "world" => Some(Layer::World),
            "intent" => Some(Layer::Intent),
            _ => None,
        }
    }

    /// The sublayers recognized under this layer
    pub fn allowed_sublayers(&self) -> &'static [Sublayer] {
        match self {
            Layer::SelfLayer => &[Sublayer::Identity, Sublayer::Preference, Sublayer::Constraint],
            Layer::World => &[Sublayer::Fact, Sublayer::Failure, Sublayer::Method],
            Layer::Intent => &[Sublayer::Rule, Sublayer::Goal, Sublayer::AntiPattern],
        }
    }

    /// Whether `sublayer` is recognized under this layer
    pub fn allows(&self, sublayer: Sublayer) -> bool {
        self.allowed_sublayers().contains(&sublayer)
    }

    /// Default sublayer for this layer
    pub fn default_sublayer(&self) -> Sublayer {
        match self {
            Layer::SelfLayer => Sublayer::Identity,
            Layer::World => Sublayer::Fact,
            Layer::Intent => Sublayer::Rule,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Second-level classification, restricted per layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sublayer {
    Identity,
    Preference,
    Constraint,
    #[default]
    Fact,
    Failure,
    Method,
    Rule,
    Goal,
    AntiPattern,
}

impl Sublayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sublayer::Identity => "identity",
            Sublayer::Preference => "preference",
            Sublayer::Constraint => "constraint",
            Sublayer::Fact => "fact",
            Sublayer::Failure => "failure",
            Sublayer::Method => "method",
            Sublayer::Rule => "rule",
            Sublayer::Goal => "goal",
            Sublayer::AntiPattern => "anti_pattern",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "identity" => Some(Sublayer::Identity),
            "preference" => Some(Sublayer::Preference),
            "constraint" => Some(Sublayer::Constraint),
            "fact" => Some(Sublayer::Fact),
            "failure" => Some(Sublayer::Failure),
            "method" => Some(Sublayer::Method),
            "rule" => Some(Sublayer::Rule),
            "goal" => Some(Sublayer::Goal),
            "anti_pattern" | "antipattern" => Some(Sublayer::AntiPattern),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sublayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// KIND
// ============================================================================

/// What kind of record a memory is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Conversation,
    Fact,
    Insight,
    Code,
    Decision,
    Task,
    #[default]
    Note,
    Preference,
    Question,
    Answer,
    Hypothesis,
    Observation,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Conversation => "conversation",
            Kind::Fact => "fact",
            Kind::Insight => "insight",
            Kind::Code => "code",
            Kind::Decision => "decision",
            Kind::Task => "task",
            Kind::Note => "note",
            Kind::Preference => "preference",
            Kind::Question => "question",
            Kind::Answer => "answer",
            Kind::Hypothesis => "hypothesis",
            Kind::Observation => "observation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conversation" => Some(Kind::Conversation),
            "fact" => Some(Kind::Fact),
            "insight" => Some(Kind::Insight),
            "code" => Some(Kind::Code),
            "decision" => Some(Kind::Decision),
            "task" => Some(Kind::Task),
            "note" => Some(Kind::Note),
            "preference" => Some(Kind::Preference),
            "question" => Some(Kind::Question),
            "answer" => Some(Kind::Answer),
            "hypothesis" => Some(Kind::Hypothesis),
            "observation" => Some(Kind::Observation),
            _ => None,
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Redundant,
    Archived,
    Superseded,
    /// Half-written record left behind by a failed compensation;
    /// reconciled by the next consolidation pass
    Orphan,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Redundant => "redundant",
            Status::Archived => "archived",
            Status::Superseded => "superseded",
            Status::Orphan => "orphan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Status::Active),
            "redundant" => Some(Status::Redundant),
            "archived" => Some(Status::Archived),
            "superseded" => Some(Status::Superseded),
            "orphan" => Some(Status::Orphan),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATIONSHIP TYPES
// ============================================================================

/// Directed relationship vocabulary between graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelType {
    RelatesTo,
    DependsOn,
    PartOf,
    CreatedBy,
    References,
    Blocks,
    Implements,
    Uses,
    SimilarTo,
    Contradicts,
    Supersedes,
    Mentions,
    About,
}

impl RelType {
    /// Every recognized relationship type, in stable order
    pub const ALL: &'static [RelType] = &[
        RelType::RelatesTo,
        RelType::DependsOn,
        RelType::PartOf,
        RelType::CreatedBy,
        RelType::References,
        RelType::Blocks,
        RelType::Implements,
        RelType::Uses,
        RelType::SimilarTo,
        RelType::Contradicts,
        RelType::Supersedes,
        RelType::Mentions,
        RelType::About,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::RelatesTo => "relates_to",
            RelType::DependsOn => "depends_on",
            RelType::PartOf => "part_of",
            RelType::CreatedBy => "created_by",
            RelType::References => "references",
            RelType::Blocks => "blocks",
            RelType::Implements => "implements",
            RelType::Uses => "uses",
            RelType::SimilarTo => "similar_to",
            RelType::Contradicts => "contradicts",
            RelType::Supersedes => "supersedes",
            RelType::Mentions => "mentions",
            RelType::About => "about",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase();
        RelType::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == normalized)
    }

    /// Physical table name for this relationship type.
    ///
    /// Derived from the closed enum, never from caller strings.
    pub fn table_name(&self) -> String {
        format!("rel_{}", self.as_str())
    }
}

impl std::fmt::Display for RelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// Maximum accepted content length, in characters
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Maximum canonical title length, in characters
pub const MAX_TITLE_CHARS: usize = 30;

/// The unit of recorded knowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Stable opaque identifier (UUID v4), assigned at creation
    pub id: String,
    /// The recorded text, 1..=10,000 characters
    pub content: String,
    /// Canonical Subject-Aspect-Qualifier short phrase; primary dedup key
    pub title: String,
    /// Stable hash of normalized content; secondary dedup key
    pub content_hash: String,
    pub layer: Layer,
    pub sublayer: Sublayer,
    pub kind: Kind,
    /// 1..=10
    pub importance: u8,
    /// 0.0..=1.0
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Starts at 1 on creation; bumped by reinforcement and retrieval
    pub access_count: i64,
    /// Per-day decay constant; 0 means never decays
    pub decay_rate: f64,
    pub reinforcement_factor: f64,
    pub status: Status,
    /// Ingesting session, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Lowercased, deduplicated, sorted
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl Memory {
    /// Days elapsed since creation, never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds() as f64 / 86_400_000.0).max(0.0)
    }

    /// Days elapsed since last access, never negative
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.last_accessed_at).num_milliseconds() as f64 / 86_400_000.0).max(0.0)
    }

    /// Temporal strength at `now`:
    /// importance, exponential decay since creation, logarithmic
    /// reinforcement by access count, and staleness since last access.
    pub fn strength(&self, now: DateTime<Utc>) -> f64 {
        let importance = f64::from(self.importance) / 10.0;
        let decay = (-self.decay_rate * self.age_days(now)).exp();
        let reinforcement =
            1.0 + self.reinforcement_factor * (1.0 + self.access_count as f64).ln();
        let staleness = (-0.1 * self.days_since_access(now)).exp();
        importance * decay * reinforcement * staleness
    }
}

/// Normalize a tag set: lowercase, trim, drop empties, dedup, sort.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Stable hash of normalized content (lowercased, whitespace-collapsed).
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let normalized: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_sublayer_pairing() {
        assert!(Layer::SelfLayer.allows(Sublayer::Preference));
        assert!(Layer::World.allows(Sublayer::Fact));
        assert!(Layer::Intent.allows(Sublayer::AntiPattern));
        assert!(!Layer::SelfLayer.allows(Sublayer::Fact));
        assert!(!Layer::World.allows(Sublayer::Goal));
        assert!(!Layer::Intent.allows(Sublayer::Identity));
    }

    #[test]
    fn test_enum_string_roundtrips() {
        for layer in [Layer::SelfLayer, Layer::World, Layer::Intent] {
            assert_eq!(Layer::parse(layer.as_str()), Some(layer));
        }
        for sub in Layer::World.allowed_sublayers() {
            assert_eq!(Sublayer::parse(sub.as_str()), Some(*sub));
        }
        for rel in RelType::ALL {
            assert_eq!(RelType::parse(rel.as_str()), Some(*rel));
        }
        assert_eq!(Kind::parse("decision"), Some(Kind::Decision));
        assert_eq!(Status::parse("superseded"), Some(Status::Superseded));
        assert_eq!(Layer::parse("unknown"), None);
    }

    #[test]
    fn test_rel_table_names() {
        assert_eq!(RelType::SimilarTo.table_name(), "rel_similar_to");
        assert_eq!(RelType::PartOf.table_name(), "rel_part_of");
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags(["Rust", "  rust ", "IDE", "", "ide", "zeta"]);
        assert_eq!(tags, vec!["ide", "rust", "zeta"]);
    }

    #[test]
    fn test_content_hash_ignores_case_and_spacing() {
        let a = content_hash("I prefer   Dark Mode");
        let b = content_hash("i prefer dark mode");
        let c = content_hash("i prefer light mode");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_strength_monotonicity() {
        let now = Utc::now();
        let base = Memory {
            id: "m1".into(),
            content: "x".into(),
            title: "T".into(),
            content_hash: content_hash("x"),
            layer: Layer::World,
            sublayer: Sublayer::Fact,
            kind: Kind::Note,
            importance: 5,
            confidence: 0.7,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            decay_rate: 0.01,
            reinforcement_factor: 0.1,
            status: Status::Active,
            session_id: None,
            tags: vec![],
            supersedes: None,
            superseded_by: None,
        };

        // More important => stronger
        let mut important = base.clone();
        important.importance = 10;
        assert!(important.strength(now) > base.strength(now));

        // Older => weaker (with nonzero decay)
        let mut old = base.clone();
        old.created_at = now - chrono::Duration::days(100);
        old.last_accessed_at = now;
        assert!(old.strength(now) < base.strength(now));

        // Zero decay rate ignores age
        let mut eternal = old.clone();
        eternal.decay_rate = 0.0;
        assert!((eternal.strength(now) - base.strength(now)).abs() < 1e-9);

        // More accesses => stronger
        let mut reinforced = base.clone();
        reinforced.access_count = 50;
        assert!(reinforced.strength(now) > base.strength(now));
    }
}
