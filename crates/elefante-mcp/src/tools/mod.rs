//! MCP tools
//!
//! One module per tool family. Every tool exposes `schema()` (its JSON
//! input schema) and an `execute` function taking the shared engine and the
//! raw argument value, returning a JSON result or a caller-visible error
//! string.

pub mod add;
pub mod consolidate;
pub mod context;
pub mod graph;
pub mod list_all;
pub mod search;
pub mod sessions;
pub mod status;

use elefante_core::{parse_timestamp, Kind, Layer, MemoryFilter, Status, Sublayer};
use serde::Deserialize;

/// Wire form of the shared retrieval filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterArgs {
    pub kinds: Vec<String>,
    pub layer: Option<String>,
    pub sublayer: Option<String>,
    pub min_importance: Option<u8>,
    pub tags: Vec<String>,
    /// RFC 3339; converted explicitly before any query
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub status: Option<String>,
}

impl FilterArgs {
    /// Convert the wire filter into the engine filter, rejecting unknown
    /// enum values and non-timestamp strings.
    pub fn into_filter(self) -> Result<MemoryFilter, String> {
        let mut filter = MemoryFilter::default();
        for raw in &self.kinds {
            let kind = Kind::parse(raw).ok_or_else(|| format!("unknown kind '{}'", raw))?;
            filter.kinds.push(kind);
        }
        if let Some(raw) = &self.layer {
            filter.layer =
                Some(Layer::parse(raw).ok_or_else(|| format!("unknown layer '{}'", raw))?);
        }
        if let Some(raw) = &self.sublayer {
            filter.sublayer = Some(
                Sublayer::parse(raw).ok_or_else(|| format!("unknown sublayer '{}'", raw))?,
            );
        }
        filter.min_importance = self.min_importance;
        filter.tags = self.tags;
        if let Some(raw) = &self.created_after {
            filter.created_after = Some(parse_timestamp(raw).map_err(|e| e.to_string())?);
        }
        if let Some(raw) = &self.created_before {
            filter.created_before = Some(parse_timestamp(raw).map_err(|e| e.to_string())?);
        }
        if let Some(raw) = &self.status {
            filter.status =
                Some(Status::parse(raw).ok_or_else(|| format!("unknown status '{}'", raw))?);
        }
        Ok(filter)
    }
}

/// Shared JSON schema fragment for the filter object
pub fn filter_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "kinds": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Restrict to these kinds (any match)"
            },
            "layer": { "type": "string", "enum": ["self", "world", "intent"] },
            "sublayer": { "type": "string" },
            "minImportance": { "type": "integer", "minimum": 1, "maximum": 10 },
            "tags": { "type": "array", "items": { "type": "string" } },
            "createdAfter": { "type": "string", "description": "RFC 3339 timestamp" },
            "createdBefore": { "type": "string", "description": "RFC 3339 timestamp" },
            "status": {
                "type": "string",
                "enum": ["active", "redundant", "archived", "superseded"],
                "description": "Defaults to active"
            }
        }
    })
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use elefante_core::{EngineConfig, HashEmbedder, MemoryEngine};
    use tempfile::TempDir;

    pub const DIM: usize = 64;

    /// Engine over a temporary data directory with the deterministic
    /// hash embedder
    pub fn test_engine() -> (Arc<MemoryEngine>, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.embedding_dim = DIM;
        let engine = MemoryEngine::open(config, Arc::new(HashEmbedder::new(DIM))).unwrap();
        (Arc::new(engine), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_args_roundtrip() {
        let args = FilterArgs {
            kinds: vec!["fact".into(), "decision".into()],
            layer: Some("world".into()),
            min_importance: Some(7),
            created_after: Some("2026-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        let filter = args.into_filter().unwrap();
        assert_eq!(filter.kinds.len(), 2);
        assert_eq!(filter.layer, Some(Layer::World));
        assert_eq!(filter.min_importance, Some(7));
        assert!(filter.created_after.is_some());
    }

    #[test]
    fn test_filter_args_reject_unknown_values() {
        let bad_kind = FilterArgs {
            kinds: vec!["sonnet".into()],
            ..Default::default()
        };
        assert!(bad_kind.into_filter().is_err());

        let bad_time = FilterArgs {
            created_after: Some("yesterday".into()),
            ..Default::default()
        };
        assert!(bad_time.into_filter().unwrap_err().contains("timestamp"));
    }
}
