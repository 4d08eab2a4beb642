//! memory.search - hybrid retrieval

use std::sync::Arc;

use elefante_core::{MemoryEngine, SearchMode, SearchOptions};
use serde::Deserialize;
use serde_json::Value;

use super::{filter_schema, FilterArgs};

/// Input schema for memory.search
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Search query"
            },
            "mode": {
                "type": "string",
                "enum": ["semantic", "structured", "hybrid"],
                "description": "Forced retrieval mode; omitted = classified from the query"
            },
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": 500,
                "default": 10
            },
            "minSimilarity": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "default": 0.3,
                "description": "Floor on the semantic component"
            },
            "includeConversation": { "type": "boolean", "default": true },
            "sessionId": { "type": "string" },
            "filters": filter_schema()
        },
        "required": ["query"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchArgs {
    query: String,
    mode: Option<String>,
    limit: Option<usize>,
    min_similarity: Option<f32>,
    include_conversation: Option<bool>,
    session_id: Option<String>,
    filters: Option<FilterArgs>,
}

fn parse_mode(raw: &str) -> Result<SearchMode, String> {
    match raw.trim().to_lowercase().as_str() {
        "semantic" => Ok(SearchMode::Semantic),
        "structured" => Ok(SearchMode::Structured),
        "hybrid" => Ok(SearchMode::Hybrid),
        other => Err(format!("unknown mode '{}'", other)),
    }
}

pub async fn execute(engine: &Arc<MemoryEngine>, args: Option<Value>) -> Result<Value, String> {
    let args: SearchArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    if args.query.trim().is_empty() {
        return Err("Query cannot be empty".to_string());
    }

    let mode = match &args.mode {
        Some(raw) => Some(parse_mode(raw)?),
        None => None,
    };
    let filter = match args.filters {
        Some(filter_args) => filter_args.into_filter()?,
        None => Default::default(),
    };
    let options = SearchOptions {
        limit: args.limit,
        mode,
        min_similarity: args.min_similarity,
        include_conversation: args.include_conversation,
        session_id: args.session_id,
        deadline_ms: None,
    };

    let response = engine
        .search(&args.query, &filter, &options)
        .await
        .map_err(|e| e.to_string())?;

    let results: Vec<Value> = response
        .results
        .iter()
        .map(|hit| {
            serde_json::json!({
                "id": hit.memory.id,
                "score": hit.score,
                "source": hit.source,
                "subScores": hit.sub_scores,
                "memory": hit.memory,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "query": args.query,
        "total": results.len(),
        "partial": response.partial,
        "plan": response.plan,
        "results": results,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
