//! sessions.list - stored session summaries

use std::sync::Arc;

use elefante_core::MemoryEngine;
use serde::Deserialize;
use serde_json::Value;

/// Input schema for sessions.list
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "limit": { "type": "integer", "minimum": 1, "maximum": 500, "default": 50 },
            "offset": { "type": "integer", "minimum": 0, "default": 0 }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionsArgs {
    limit: Option<usize>,
    offset: Option<usize>,
}

pub async fn execute(engine: &Arc<MemoryEngine>, args: Option<Value>) -> Result<Value, String> {
    let args: SessionsArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => SessionsArgs::default(),
    };

    let sessions = engine
        .sessions(args.offset.unwrap_or(0), args.limit.unwrap_or(50))
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "total": sessions.len(),
        "sessions": sessions,
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_engine;

    #[tokio::test]
    async fn test_sessions_empty() {
        let (engine, _dir) = test_engine();
        let result = execute(&engine, None).await.unwrap();
        assert_eq!(result["total"], 0);
    }

    #[tokio::test]
    async fn test_sessions_listed_with_counts() {
        let (engine, _dir) = test_engine();
        let record = serde_json::json!({
            "sessionId": "sess-9",
            "role": "user",
            "text": "hello there"
        });
        crate::tools::context::execute_record(&engine, Some(record))
            .await
            .unwrap();

        let result = execute(&engine, None).await.unwrap();
        assert_eq!(result["total"], 1);
        assert_eq!(result["sessions"][0]["id"], "sess-9");
        assert_eq!(result["sessions"][0]["messageCount"], 1);
    }
}
