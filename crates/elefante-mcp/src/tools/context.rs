//! context.get / context.record - session context surface

use std::sync::Arc;

use elefante_core::{MemoryEngine, Role};
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// context.get
// ============================================================================

/// Input schema for context.get
pub fn get_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sessionId": { "type": "string" },
            "depth": {
                "type": "integer",
                "minimum": 1,
                "maximum": 2,
                "default": 1,
                "description": "Neighborhood expansion depth around session memories"
            },
            "limit": { "type": "integer", "minimum": 1, "maximum": 500, "default": 20 }
        },
        "required": ["sessionId"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GetArgs {
    session_id: String,
    depth: Option<u8>,
    limit: Option<usize>,
}

pub async fn execute_get(
    engine: &Arc<MemoryEngine>,
    args: Option<Value>,
) -> Result<Value, String> {
    let args: GetArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    if args.session_id.trim().is_empty() {
        return Err("sessionId cannot be empty".to_string());
    }

    let bundle = engine
        .context(
            &args.session_id,
            args.depth.unwrap_or(1),
            args.limit.unwrap_or(20),
        )
        .await
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "sessionId": bundle.session_id,
        "messages": bundle.messages,
        "memories": bundle.memories,
        "neighborhood": bundle.neighborhood,
    }))
}

// ============================================================================
// context.record
// ============================================================================

/// Input schema for context.record
pub fn record_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sessionId": { "type": "string" },
            "role": { "type": "string", "enum": ["user", "assistant", "system"] },
            "text": { "type": "string" }
        },
        "required": ["sessionId", "role", "text"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RecordArgs {
    session_id: String,
    role: String,
    text: String,
}

pub async fn execute_record(
    engine: &Arc<MemoryEngine>,
    args: Option<Value>,
) -> Result<Value, String> {
    let args: RecordArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    let role = Role::parse(&args.role).ok_or_else(|| format!("unknown role '{}'", args.role))?;

    engine
        .record_message(&args.session_id, role, &args.text)
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "recorded": true }))
}

// ============================================================================
// TESTS
// ============================================================================
