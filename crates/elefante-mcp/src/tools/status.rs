//! system.status - lock state and store counts

use std::sync::Arc;

use elefante_core::MemoryEngine;
use serde_json::Value;

/// Input schema for system.status
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(engine: &Arc<MemoryEngine>, _args: Option<Value>) -> Result<Value, String> {
    let status = engine.status().map_err(|e| e.to_string())?;
    serde_json::to_value(&status).map_err(|e| e.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_engine;

    #[tokio::test]
    async fn test_status_on_fresh_store() {
        let (engine, _dir) = test_engine();
        let result = execute(&engine, None).await.unwrap();
        assert_eq!(result["locked"], false);
        assert_eq!(result["counts"]["memoriesTotal"], 0);
        assert!(result["version"].is_string());
    }

    #[tokio::test]
    async fn test_status_counts_after_adds() {
        let (engine, _dir) = test_engine();
        let add = serde_json::json!({ "content": "counted", "title": "Count-Fact-One" });
        crate::tools::add::execute(&engine, Some(add)).await.unwrap();

        let result = execute(&engine, None).await.unwrap();
        assert_eq!(result["counts"]["memoriesActive"], 1);
        assert_eq!(result["counts"]["vectorRecords"], 1);
    }
}
