//! Memory module - core data model
//!
//! The unit of recorded knowledge (`Memory`), the closed classification
//! vocabulary, graph entities and relationships, session messages, and the
//! filter/statistics types shared by retrieval and ingestion.

mod model;
pub mod title;

pub use model::{
    content_hash, normalize_tags, Kind, Layer, Memory, RelType, Status, Sublayer,
    MAX_CONTENT_CHARS, MAX_TITLE_CHARS,
};
pub use title::SaqTitle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITIES & RELATIONSHIPS
// ============================================================================

/// A node in the property graph (person, project, concept, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    /// Free-form type tag: `person`, `project`, `concept`, `technology`, `file`, ...
    pub entity_type: String,
    /// Free-form property map, serialized as a single string value in the
    /// graph store (nested maps are not representable there)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A directed edge between graph nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// SESSIONS & MESSAGES
// ============================================================================

/// Who authored a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }

    /// Weight of this role in conversation scoring
    pub fn weight(&self) -> f64 {
        match self {
            Role::User => 1.0,
            Role::Assistant => 0.6,
            Role::System => 0.3,
        }
    }
}

/// One record of a session's append-only message log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub session_id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Summary of a stored session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: i64,
    pub memory_count: i64,
}

// ============================================================================
// FILTERS
// ============================================================================

/// Constraints applied to retrieval candidates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryFilter {
    /// Restrict to these kinds (any match); empty means all
    pub kinds: Vec<Kind>,
    pub layer: Option<Layer>,
    pub sublayer: Option<Sublayer>,
    pub min_importance: Option<u8>,
    /// Any-match over the memory's tag set
    pub tags: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Defaults to `active` when unset
    pub status: Option<Status>,
}

impl MemoryFilter {
    /// The status this filter effectively requires
    pub fn effective_status(&self) -> Status {
        self.status.unwrap_or(Status::Active)
    }

    /// Whether a memory satisfies every constraint in this filter
    pub fn matches(&self, memory: &Memory) -> bool {
        if memory.status != self.effective_status() {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&memory.kind) {
            return false;
        }
        if let Some(layer) = self.layer {
            if memory.layer != layer {
                return false;
            }
        }
        if let Some(sublayer) = self.sublayer {
            if memory.sublayer != sublayer {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if memory.importance < min {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let wanted = normalize_tags(self.tags.iter().map(String::as_str));
            if !wanted.iter().any(|t| memory.tags.contains(t)) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if memory.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if memory.created_at > before {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Store-wide counts reported by `system.status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub memories_total: i64,
    pub memories_active: i64,
    pub memories_redundant: i64,
    pub memories_archived: i64,
    pub memories_superseded: i64,
    pub entities: i64,
    pub relationships: i64,
    pub sessions: i64,
    pub vector_records: i64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory() -> Memory {
        let now = Utc::now();
        Memory {
            id: "m1".into(),
            content: "Rust uses ownership for memory safety".into(),
            title: "Rust-Fact-Ownership".into(),
            content_hash: content_hash("Rust uses ownership for memory safety"),
            layer: Layer::World,
            sublayer: Sublayer::Fact,
            kind: Kind::Fact,
            importance: 7,
            confidence: 0.9,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            decay_rate: 0.01,
            reinforcement_factor: 0.1,
            status: Status::Active,
            session_id: None,
            tags: vec!["rust".into()],
            supersedes: None,
            superseded_by: None,
        }
    }

    #[test]
    fn test_filter_default_requires_active() {
        let mut memory = sample_memory();
        let filter = MemoryFilter::default();
        assert!(filter.matches(&memory));

        memory.status = Status::Redundant;
        assert!(!filter.matches(&memory));

        let redundant_filter = MemoryFilter {
            status: Some(Status::Redundant),
            ..Default::default()
        };
        assert!(redundant_filter.matches(&memory));
    }

    #[test]
    fn test_filter_constraints() {
        let memory = sample_memory();

        let by_layer = MemoryFilter {
            layer: Some(Layer::World),
            ..Default::default()
        };
        assert!(by_layer.matches(&memory));

        let wrong_layer = MemoryFilter {
            layer: Some(Layer::Intent),
            ..Default::default()
        };
        assert!(!wrong_layer.matches(&memory));

        let by_importance = MemoryFilter {
            min_importance: Some(8),
            ..Default::default()
        };
        assert!(!by_importance.matches(&memory));

        let by_tag = MemoryFilter {
            tags: vec!["RUST".into()],
            ..Default::default()
        };
        assert!(by_tag.matches(&memory));

        let by_kind = MemoryFilter {
            kinds: vec![Kind::Decision, Kind::Fact],
            ..Default::default()
        };
        assert!(by_kind.matches(&memory));
    }

    #[test]
    fn test_filter_creation_window() {
        let memory = sample_memory();
        let earlier = memory.created_at - chrono::Duration::hours(1);
        let later = memory.created_at + chrono::Duration::hours(1);

        let inside = MemoryFilter {
            created_after: Some(earlier),
            created_before: Some(later),
            ..Default::default()
        };
        assert!(inside.matches(&memory));

        let outside = MemoryFilter {
            created_after: Some(later),
            ..Default::default()
        };
        assert!(!outside.matches(&memory));
    }

    #[test]
    fn test_role_weights() {
        assert!(Role::User.weight() > Role::Assistant.weight());
        assert!(Role::Assistant.weight() > Role::System.weight());
    }
}
