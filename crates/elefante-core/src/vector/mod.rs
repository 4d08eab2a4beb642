//! Vector index adapter
//!
//! Contract over an ANN index plus a metadata record table. Metadata at this
//! layer is strictly flat: scalar values only, lists encoded as
//! comma-separated strings, nested objects rejected outright.

mod index;

pub use index::LocalVectorStore;

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{normalize_tags, Kind, Layer, Memory, MemoryFilter, Status, Sublayer};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector store failure
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    /// The backing store could not be reached or opened
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    /// A write could not be applied
    #[error("vector store write failed: {0}")]
    WriteFailed(String),
    /// Vector dimension disagrees with the configured constant
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Metadata contained a nested object or array of non-scalars
    #[error("metadata key '{key}' is not a flat scalar")]
    NestedMetadata { key: String },
    /// A stored record could not be decoded
    #[error("corrupt vector record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

pub type VectorResult<T> = std::result::Result<T, VectorStoreError>;

// ============================================================================
// FLAT METADATA
// ============================================================================

/// A flat scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            MetaValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Flat metadata map with deterministic key order
pub type Metadata = BTreeMap<String, MetaValue>;

/// Convert a free-form JSON value into flat metadata.
///
/// Scalars pass through; arrays of scalars become comma-separated strings;
/// objects and nested arrays are rejected.
pub fn flatten_json(key: &str, value: &serde_json::Value) -> VectorResult<MetaValue> {
    use serde_json::Value;
    match value {
        Value::Bool(b) => Ok(MetaValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(MetaValue::Int(i))
            } else {
                Ok(MetaValue::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Ok(MetaValue::Str(s.clone())),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.clone()),
                    Value::Number(n) => parts.push(n.to_string()),
                    Value::Bool(b) => parts.push(b.to_string()),
                    _ => {
                        return Err(VectorStoreError::NestedMetadata {
                            key: key.to_string(),
                        })
                    }
                }
            }
            Ok(MetaValue::Str(parts.join(",")))
        }
        Value::Null | Value::Object(_) => Err(VectorStoreError::NestedMetadata {
            key: key.to_string(),
        }),
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// One stored vector record
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: Metadata,
}

/// One ANN query hit, carrying the record for hydration
#[derive(Debug, Clone)]
pub struct VectorQueryHit {
    pub id: String,
    /// Cosine similarity in [0, 1]
    pub similarity: f32,
    pub content: String,
    pub metadata: Metadata,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The vector index contract.
///
/// Single-writer per process; the engine serializes cross-process writes via
/// the lock manager. `get_all` is the exact unfiltered enumeration in
/// insertion order and never ranks by relevance.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, record: &VectorRecord) -> VectorResult<()>;

    /// Replace only the metadata of an existing record (access bumps,
    /// reinforcement). No-op returning false when the id is unknown.
    fn update_metadata(&self, id: &str, metadata: &Metadata) -> VectorResult<bool>;

    fn delete(&self, id: &str) -> VectorResult<bool>;

    fn get(&self, id: &str) -> VectorResult<Option<VectorRecord>>;

    /// ANN lookup; `filter` is applied to hydrated candidates before
    /// truncation to `k`.
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MemoryFilter>,
    ) -> VectorResult<Vec<VectorQueryHit>>;

    fn get_all(&self, offset: usize, limit: usize) -> VectorResult<Vec<VectorRecord>>;

    fn count(&self) -> VectorResult<i64>;
}

// ============================================================================
// MEMORY <-> METADATA
// ============================================================================

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Flatten a memory's scalar fields into vector-store metadata
pub fn memory_to_metadata(memory: &Memory) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("title".into(), MetaValue::Str(memory.title.clone()));
    meta.insert(
        "content_hash".into(),
        MetaValue::Str(memory.content_hash.clone()),
    );
    meta.insert(
        "memory_layer".into(),
        MetaValue::Str(memory.layer.as_str().into()),
    );
    meta.insert(
        "memory_sublayer".into(),
        MetaValue::Str(memory.sublayer.as_str().into()),
    );
    meta.insert(
        "memory_kind".into(),
        MetaValue::Str(memory.kind.as_str().into()),
    );
    meta.insert(
        "importance".into(),
        MetaValue::Int(i64::from(memory.importance)),
    );
    meta.insert(
        "confidence".into(),
        MetaValue::Float(f64::from(memory.confidence)),
    );
    meta.insert("created_ms".into(), MetaValue::Int(ms(memory.created_at)));
    meta.insert(
        "last_accessed_ms".into(),
        MetaValue::Int(ms(memory.last_accessed_at)),
    );
    meta.insert("access_count".into(), MetaValue::Int(memory.access_count));
    meta.insert("decay_rate".into(), MetaValue::Float(memory.decay_rate));
    meta.insert(
        "reinforcement_factor".into(),
        MetaValue::Float(memory.reinforcement_factor),
    );
    meta.insert(
        "memory_status".into(),
        MetaValue::Str(memory.status.as_str().into()),
    );
    if let Some(session) = &memory.session_id {
        meta.insert("session_id".into(), MetaValue::Str(session.clone()));
    }
    meta.insert("tags".into(), MetaValue::Str(memory.tags.join(",")));
    if let Some(supersedes) = &memory.supersedes {
        meta.insert("supersedes".into(), MetaValue::Str(supersedes.clone()));
    }
    if let Some(by) = &memory.superseded_by {
        meta.insert("superseded_by".into(), MetaValue::Str(by.clone()));
    }
    meta
}

fn meta_str(meta: &Metadata, key: &str) -> Option<String> {
    meta.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Rebuild a memory from a stored record's content and flat metadata
pub fn memory_from_parts(id: &str, content: &str, meta: &Metadata) -> VectorResult<Memory> {
    let corrupt = |reason: &str| VectorStoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let layer = meta_str(meta, "memory_layer")
        .and_then(|s| Layer::parse(&s))
        .ok_or_else(|| corrupt("missing or invalid layer"))?;
    let sublayer = meta_str(meta, "memory_sublayer")
        .and_then(|s| Sublayer::parse(&s))
        .ok_or_else(|| corrupt("missing or invalid sublayer"))?;
    let kind = meta_str(meta, "memory_kind")
        .and_then(|s| Kind::parse(&s))
        .ok_or_else(|| corrupt("missing or invalid kind"))?;
    let status = meta_str(meta, "memory_status")
        .and_then(|s| Status::parse(&s))
        .ok_or_else(|| corrupt("missing or invalid status"))?;

    let tags = meta_str(meta, "tags")
        .map(|joined| normalize_tags(joined.split(',').filter(|t| !t.is_empty())))
        .unwrap_or_default();

    Ok(Memory {
        id: id.to_string(),
        content: content.to_string(),
        title: meta_str(meta, "title").ok_or_else(|| corrupt("missing title"))?,
        content_hash: meta_str(meta, "content_hash").unwrap_or_default(),
        layer,
        sublayer,
        kind,
        importance: meta
            .get("importance")
            .and_then(MetaValue::as_i64)
            .map(|v| v.clamp(1, 10) as u8)
            .unwrap_or(5),
        confidence: meta
            .get("confidence")
            .and_then(MetaValue::as_f64)
            .map(|v| v as f32)
            .unwrap_or(0.7),
        created_at: meta
            .get("created_ms")
            .and_then(MetaValue::as_i64)
            .map(from_ms)
            .ok_or_else(|| corrupt("missing created_ms"))?,
        last_accessed_at: meta
            .get("last_accessed_ms")
            .and_then(MetaValue::as_i64)
            .map(from_ms)
            .ok_or_else(|| corrupt("missing last_accessed_ms"))?,
        access_count: meta
            .get("access_count")
            .and_then(MetaValue::as_i64)
            .unwrap_or(1),
        decay_rate: meta
            .get("decay_rate")
            .and_then(MetaValue::as_f64)
            .unwrap_or(0.01),
        reinforcement_factor: meta
            .get("reinforcement_factor")
            .and_then(MetaValue::as_f64)
            .unwrap_or(0.1),
        status,
        session_id: meta_str(meta, "session_id"),
        tags,
        supersedes: meta_str(meta, "supersedes"),
        superseded_by: meta_str(meta, "superseded_by"),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::content_hash;

    fn sample_memory() -> Memory {
        let now = Utc.timestamp_millis_opt(1_750_000_000_000).single().unwrap();
        Memory {
            id: "mem-1".into(),
            content: "Python 3.11 made startup 25% faster".into(),
            title: "World-Fact-Python311".into(),
            content_hash: content_hash("Python 3.11 made startup 25% faster"),
            layer: Layer::World,
            sublayer: Sublayer::Fact,
            kind: Kind::Fact,
            importance: 6,
            confidence: 0.8,
            created_at: now,
            last_accessed_at: now,
            access_count: 3,
            decay_rate: 0.01,
            reinforcement_factor: 0.1,
            status: Status::Active,
            session_id: Some("sess-9".into()),
            tags: vec!["performance".into(), "python".into()],
            supersedes: None,
            superseded_by: None,
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let memory = sample_memory();
        let meta = memory_to_metadata(&memory);
        let rebuilt = memory_from_parts(&memory.id, &memory.content, &meta).unwrap();

        assert_eq!(rebuilt.title, memory.title);
        assert_eq!(rebuilt.layer, memory.layer);
        assert_eq!(rebuilt.sublayer, memory.sublayer);
        assert_eq!(rebuilt.kind, memory.kind);
        assert_eq!(rebuilt.importance, memory.importance);
        assert_eq!(rebuilt.access_count, memory.access_count);
        assert_eq!(rebuilt.created_at, memory.created_at);
        assert_eq!(rebuilt.tags, memory.tags);
        assert_eq!(rebuilt.session_id, memory.session_id);
        assert_eq!(rebuilt.status, memory.status);
    }

    #[test]
    fn test_metadata_is_flat_scalars() {
        let meta = memory_to_metadata(&sample_memory());
        // Tags are a comma-joined string, never a list
        assert_eq!(
            meta.get("tags").and_then(|v| v.as_str()),
            Some("performance,python")
        );
    }

    #[test]
    fn test_flatten_json_rejects_nesting() {
        let nested = serde_json::json!({"a": 1});
        assert!(matches!(
            flatten_json("props", &nested),
            Err(VectorStoreError::NestedMetadata { .. })
        ));

        let deep_array = serde_json::json!([[1, 2]]);
        assert!(flatten_json("x", &deep_array).is_err());
    }

    #[test]
    fn test_flatten_json_encodes_lists() {
        let list = serde_json::json!(["alpha", "beta"]);
        assert_eq!(
            flatten_json("names", &list).unwrap(),
            MetaValue::Str("alpha,beta".into())
        );
        assert_eq!(
            flatten_json("n", &serde_json::json!(42)).unwrap(),
            MetaValue::Int(42)
        );
    }

    #[test]
    fn test_corrupt_metadata_detected() {
        let mut meta = memory_to_metadata(&sample_memory());
        meta.remove("memory_layer");
        assert!(matches!(
            memory_from_parts("mem-1", "x", &meta),
            Err(VectorStoreError::Corrupt { .. })
        ));
    }
}
