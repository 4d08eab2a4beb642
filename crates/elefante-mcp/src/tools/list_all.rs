//! memory.list_all - exact unfiltered enumeration

use std::sync::Arc;

use elefante_core::MemoryEngine;
use serde::Deserialize;
use serde_json::Value;

use super::{filter_schema, FilterArgs};

/// Input schema for memory.list_all
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": 500,
                "default": 100
            },
            "offset": { "type": "integer", "minimum": 0, "default": 0 },
            "filters": filter_schema()
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListArgs {
    limit: Option<usize>,
    offset: Option<usize>,
    filters: Option<FilterArgs>,
}

pub async fn execute(engine: &Arc<MemoryEngine>, args: Option<Value>) -> Result<Value, String> {
    let args: ListArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => ListArgs::default(),
    };

    let filter = match args.filters {
        Some(filter_args) => Some(filter_args.into_filter()?),
        None => None,
    };
    let limit = args.limit.unwrap_or(100).clamp(1, 500);
    let offset = args.offset.unwrap_or(0);

    let memories = engine
        .list_all(offset, limit, filter)
        .await
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "offset": offset,
        "total": memories.len(),
        "memories": memories,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
