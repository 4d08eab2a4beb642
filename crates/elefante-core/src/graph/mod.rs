//! Graph store adapter
//!
//! Contract over a labeled property graph: node tables (`Memory`, `Entity`,
//! `Session`, `User`) with scalar properties, one relationship table per
//! `rel_type`, and a single-writer lock on the store directory.
//!
//! This module is the single chokepoint for the store's reserved-word
//! hazard: the tokens `properties`, `type`, and `label` are reserved at the
//! data-manipulation layer and are rejected here, both at schema creation
//! and at property-map serialization. Free-form maps travel as a single
//! serialized `props` string.

mod store;

pub use store::LocalGraphStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{
    Entity, Memory, Message, Relationship, SessionSummary, Status, StoreCounts,
};

// ============================================================================
// RESERVED WORDS
// ============================================================================

/// Identifiers the store's DML treats as reserved; never valid property names
pub const RESERVED_PROPERTY_NAMES: &[&str] = &["properties", "type", "label"];

/// Whether a property name is reserved at the DML layer
pub fn is_reserved_property(name: &str) -> bool {
    RESERVED_PROPERTY_NAMES.contains(&name.to_lowercase().as_str())
}

/// Serialize a free-form property map into the single-string `props` value,
/// rejecting reserved key names.
pub fn serialize_props(
    props: &serde_json::Map<String, serde_json::Value>,
) -> GraphResult<String> {
    for key in props.keys() {
        if is_reserved_property(key) {
            return Err(GraphStoreError::ReservedWord { name: key.clone() });
        }
    }
    serde_json::to_string(props).map_err(|e| GraphStoreError::WriteFailed(e.to_string()))
}

/// Convert an RFC 3339 string into a stored timestamp, explicitly.
/// The store refuses implicit string-to-timestamp casts; callers convert
/// before the query.
pub fn parse_timestamp(raw: &str) -> GraphResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GraphStoreError::SchemaMismatch(format!("not a timestamp '{}': {}", raw, e)))
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Graph store failure
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphStoreError {
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("graph store write failed: {0}")]
    WriteFailed(String),
    /// Another writer holds the store's exclusive lock
    #[error("graph store locked by pid {pid} since {ts_ms}")]
    LockHeld { pid: u32, ts_ms: i64 },
    /// A reserved identifier was used as a property name
    #[error("reserved property name: {name}")]
    ReservedWord { name: String },
    /// A relationship endpoint does not resolve to any node
    #[error("relationship endpoint missing: {id}")]
    EndpointMissing { id: String },
    /// Schema-level disagreement (bad timestamp, rejected statement, ...)
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("corrupt graph record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

pub type GraphResult<T> = std::result::Result<T, GraphStoreError>;

// ============================================================================
// LOOKUP RESULTS
// ============================================================================

/// Which node table a graph row lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeTable {
    Memory,
    Entity,
    Session,
    User,
}

impl NodeTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeTable::Memory => "memory",
            NodeTable::Entity => "entity",
            NodeTable::Session => "session",
            NodeTable::User => "user",
        }
    }
}

/// One label-index hit from `find_by_label`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelMatch {
    pub id: String,
    /// The matched label text (entity name or memory title)
    pub entity_label: String,
    pub table: NodeTable,
    /// Exact match (true) vs prefix match (false)
    pub exact: bool,
}

/// One node reached by a neighborhood expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub id: String,
    pub table: NodeTable,
    /// Relationship type of the edge that reached this node first
    pub rel_type: String,
    pub weight: f64,
    /// Hop distance from the expansion origin (1 or 2)
    pub distance: u8,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The labeled-property-graph contract.
///
/// Node properties are scalars only; timestamps are stored natively as epoch
/// milliseconds. Mutations validate reserved words and endpoint existence.
/// The session message log is part of this store so the write-lock file
/// stays the sole inter-process coordinator.
pub trait GraphStore: Send + Sync {
    // ----- memory nodes -----
    fn upsert_memory(&self, memory: &Memory) -> GraphResult<()>;
    fn memory(&self, id: &str) -> GraphResult<Option<Memory>>;
    fn memory_by_title(&self, title: &str, status: Status) -> GraphResult<Option<Memory>>;
    fn memory_by_hash(&self, content_hash: &str, status: Status) -> GraphResult<Option<Memory>>;
    fn memories_with_status(&self, status: Status) -> GraphResult<Vec<Memory>>;
    fn delete_memory(&self, id: &str) -> GraphResult<bool>;

    // ----- entity nodes -----
    /// Merge by `(name, entity_type)`; returns the entity id
    fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        props: Option<&str>,
    ) -> GraphResult<String>;
    fn entity(&self, id: &str) -> GraphResult<Option<Entity>>;

    // ----- session nodes & message log -----
    fn upsert_session(&self, session_id: &str, at: DateTime<Utc>) -> GraphResult<()>;
    fn append_message(&self, message: &Message) -> GraphResult<()>;
    /// Last `n` messages of a session, oldest first
    fn recent_messages(&self, session_id: &str, n: usize) -> GraphResult<Vec<Message>>;
    fn sessions(&self, offset: usize, limit: usize) -> GraphResult<Vec<SessionSummary>>;
    /// Ids of memories attached to a session via `part_of`
    fn session_memory_ids(&self, session_id: &str) -> GraphResult<Vec<String>>;

    // ----- relationships -----
    fn upsert_edge(&self, relationship: &Relationship) -> GraphResult<()>;
    fn edges_from(&self, id: &str) -> GraphResult<Vec<Relationship>>;

    // ----- lookups -----
    fn find_by_label(&self, needle: &str, k: usize) -> GraphResult<Vec<LabelMatch>>;
    fn neighborhood(&self, id: &str, depth: u8, limit: usize) -> GraphResult<Vec<Neighbor>>;

    /// Parameterized read-only query against the graph schema.
    /// Mutating statements are rejected with `SchemaMismatch`.
    fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> GraphResult<Vec<serde_json::Map<String, serde_json::Value>>>;

    // ----- maintenance -----
    fn counts(&self) -> GraphResult<StoreCounts>;
    fn export_snapshot(&self) -> GraphResult<serde_json::Value>;
}

// ============================================================================
// TESTS
// ============================================================================
