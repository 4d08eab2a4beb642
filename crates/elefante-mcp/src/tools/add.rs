//! memory.add - commit or reinforce one memory

use std::sync::Arc;

use elefante_core::{
    AddMemoryInput, EntityInput, Kind, Layer, MemoryEngine, RelationshipInput, Sublayer,
};
use serde::Deserialize;
use serde_json::Value;

/// Input schema for memory.add
pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "The text to remember (1-10000 characters)"
            },
            "title": {
                "type": "string",
                "description": "Canonical Subject-Aspect-Qualifier title (max 30 chars); derived when omitted"
            },
            "layer": { "type": "string", "enum": ["self", "world", "intent"] },
            "sublayer": { "type": "string" },
            "kind": { "type": "string" },
            "importance": { "type": "integer", "minimum": 1, "maximum": 10, "default": 5 },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.7 },
            "tags": { "type": "array", "items": { "type": "string" } },
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "entityType": { "type": "string" },
                        "props": { "type": "object" }
                    },
                    "required": ["name"]
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "fromRef": { "type": "string", "description": "'self', an entity name, or a node id" },
                        "toRef": { "type": "string" },
                        "relType": { "type": "string" },
                        "weight": { "type": "number" },
                        "props": { "type": "object" }
                    },
                    "required": ["fromRef", "toRef", "relType"]
                }
            },
            "metadata": { "type": "object", "description": "Flat scalar map; lists become comma-separated strings" },
            "forceNew": { "type": "boolean", "default": false },
            "supersedes": { "type": "string", "description": "Id of a memory this one replaces" },
            "sessionId": { "type": "string" }
        },
        "required": ["content"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AddArgs {
    content: String,
    title: Option<String>,
    layer: Option<String>,
    sublayer: Option<String>,
    kind: Option<String>,
    importance: Option<u8>,
    confidence: Option<f32>,
    tags: Vec<String>,
    entities: Vec<EntityArg>,
    relationships: Vec<RelationshipArg>,
    metadata: Option<serde_json::Map<String, Value>>,
    force_new: bool,
    supersedes: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EntityArg {
    name: String,
    entity_type: Option<String>,
    props: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RelationshipArg {
    from_ref: String,
    to_ref: String,
    rel_type: String,
    weight: Option<f64>,
    props: Option<serde_json::Map<String, Value>>,
}

pub async fn execute(engine: &Arc<MemoryEngine>, args: Option<Value>) -> Result<Value, String> {
    let args: AddArgs = match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("Invalid arguments: {}", e))?,
        None => return Err("Missing arguments".to_string()),
    };
    if args.content.trim().is_empty() {
        return Err("Content cannot be empty".to_string());
    }

    let layer = match &args.layer {
        Some(raw) => Some(Layer::parse(raw).ok_or_else(|| format!("unknown layer '{}'", raw))?),
        None => None,
    };
    let sublayer = match &args.sublayer {
        Some(raw) => {
            Some(Sublayer::parse(raw).ok_or_else(|| format!("unknown sublayer '{}'", raw))?)
        }
        None => None,
    };
    let kind = match &args.kind {
        Some(raw) => Some(Kind::parse(raw).ok_or_else(|| format!("unknown kind '{}'", raw))?),
        None => None,
    };

    let input = AddMemoryInput {
        content: args.content,
        title: args.title,
        layer,
        sublayer,
        kind,
        importance: args.importance,
        confidence: args.confidence,
        tags: args.tags,
        entities: args
            .entities
            .into_iter()
            .map(|e| EntityInput {
                name: e.name,
                entity_type: e.entity_type,
                props: e.props,
            })
            .collect(),
        relationships: args
            .relationships
            .into_iter()
            .map(|r| RelationshipInput {
                from_ref: r.from_ref,
                to_ref: r.to_ref,
                rel_type: r.rel_type,
                weight: r.weight,
                props: r.props,
            })
            .collect(),
        metadata: args.metadata,
        force_new: args.force_new,
        supersedes: args.supersedes,
        session_id: args.session_id,
        deadline_ms: None,
    };

    let outcome = engine.add_memory(input).await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "id": outcome.id,
        "action": outcome.action,
        "warnings": outcome.warnings,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
