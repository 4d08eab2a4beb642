//! memory.consolidate - duplicate collapse, decay archive, orphan repair

use std::sync::Arc;

use elefante_core::MemoryEngine;
use serde::Deserialize;
use serde_json::Value;

/// Input schema for memory.consolidate
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "force": {
                "type": "boolean",
                "default": false,
                "description": "Apply the proposed actions; default is a dry-run inspection"
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConsolidateArgs {
    force: bool,
}

pub async fn execute(engine: &Arc<MemoryEngine>, args: Option<Value>) -> Result<Value, String> {
    let args: ConsolidateArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => ConsolidateArgs::default(),
    };

    let report = engine
        .consolidate(args.force)
        .await
        .map_err(|e| e.to_string())?;

    Ok(serde_json::json!({
        "dryRun": report.dry_run,
        "stats": report.stats,
        "actions": report.actions,
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
    async fn test_consolidate_defaults_to_dry_run() {
        let (engine, _dir) = test_engine();
        let result = execute(&engine, None).await.unwrap();
        assert_eq!(result["dryRun"], true);
        assert!(result["actions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_consolidate_force_collapses_duplicates() {
        let (engine, _dir) = test_engine();
        // Two distinct contents forced under the same title
        let first = serde_json::json!({
            "content": "version one of the fact",
            "title": "Dup-Fact-Same"
        });
        crate::tools::add::execute(&engine, Some(first)).await.unwrap();
        let second = serde_json::json!({
            "content": "version two of the fact",
            "title": "Dup-Fact-Same",
            "forceNew": true
        });
        crate::tools::add::execute(&engine, Some(second)).await.unwrap();

        let dry = execute(&engine, None).await.unwrap();
        assert_eq!(dry["stats"]["duplicatesCollapsed"], 1);

        let forced = execute(&engine, Some(serde_json::json!({ "force": true })))
            .await
            .unwrap();
        assert_eq!(forced["dryRun"], false);
        assert_eq!(forced["stats"]["duplicatesCollapsed"], 1);

        // Idempotent: a second forced pass proposes nothing
        let again = execute(&engine, Some(serde_json::json!({ "force": true })))
            .await
            .unwrap();
        assert!(again["actions"].as_array().unwrap().is_empty());
    }
}
