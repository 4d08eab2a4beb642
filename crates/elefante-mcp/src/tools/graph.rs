//! graph.query / graph.entity.create / graph.relationship.create

use std::sync::Arc;

use elefante_core::MemoryEngine;
use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// graph.query
// ============================================================================

/// Input schema for graph.query
pub fn query_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "statement": {
                "type": "string",
                "description": "Read-only SELECT/WITH statement over the graph schema \
                                (memory_nodes, entity_nodes, session_nodes, rel_* tables)"
            },
            "params": {
                "type": "array",
                "description": "Positional parameters bound to ?1, ?2, ..."
            }
        },
        "required": ["statement"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QueryArgs {
    statement: String,
    params: Vec<Value>,
}

pub async fn execute_query(
    engine: &Arc<MemoryEngine>,
    args: Option<Value>,
) -> Result<Value, String> {
    let args: QueryArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    if args.statement.trim().is_empty() {
        return Err("Statement cannot be empty".to_string());
    }

    let rows = engine
        .graph_query(&args.statement, &args.params)
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "total": rows.len(),
        "rows": rows,
    }))
}

// ============================================================================
// graph.entity.create
// ============================================================================

/// Input schema for graph.entity.create
pub fn entity_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "entityType": {
                "type": "string",
                "description": "person, project, concept, technology, file, ..."
            },
            "props": {
                "type": "object",
                "description": "Free-form map, stored as a single serialized value; \
                                the names 'properties', 'type', and 'label' are reserved"
            }
        },
        "required": ["name", "entityType"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EntityArgs {
    name: String,
    entity_type: String,
    props: Option<serde_json::Map<String, Value>>,
}

pub async fn execute_entity_create(
    engine: &Arc<MemoryEngine>,
    args: Option<Value>,
) -> Result<Value, String> {
    let args: EntityArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    let id = engine
        .entity_create(&args.name, &args.entity_type, args.props.as_ref())
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "id": id }))
}

// ============================================================================
// graph.relationship.create
// ============================================================================

/// Input schema for graph.relationship.create
pub fn relationship_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "fromId": { "type": "string" },
            "toId": { "type": "string" },
            "relType": {
                "type": "string",
                "description": "relates_to, depends_on, part_of, created_by, references, \
                                blocks, implements, uses, similar_to, contradicts, \
                                supersedes, mentions, about"
            },
            "props": { "type": "object" }
        },
        "required": ["fromId", "toId", "relType"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RelationshipArgs {
    from_id: String,
    to_id: String,
    rel_type: String,
    props: Option<serde_json::Map<String, Value>>,
}

pub async fn execute_relationship_create(
    engine: &Arc<MemoryEngine>,
    args: Option<Value>,
) -> Result<Value, String> {
    let args: RelationshipArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };

    engine
        .relationship_create(&args.from_id, &args.to_id, &args.rel_type, args.props.as_ref())
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({}))
}

// ============================================================================
// TESTS
// ============================================================================
