//! MCP server core
//!
//! Routes JSON-RPC requests to the tool handlers. The tool set is the
//! canonical ten-tool surface plus `context.record`, the convenience that
//! feeds the session log.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools;
use elefante_core::MemoryEngine;

/// MCP server implementation
pub struct McpServer {
    engine: Arc<MemoryEngine>,
    initialized: bool,
}

impl McpServer {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self {
            engine,
            initialized: false,
        }
    }

    /// Handle one incoming JSON-RPC request; `None` for notifications
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.params).await,
            "resources/list" => Ok(serde_json::json!({ "resources": [] })),
            "ping" => Ok(serde_json::json!({})),
            method => {
                warn!("unknown method: {}", method);
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    async fn handle_initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Use the client's protocol version when it is older than ours;
        // clients reject servers that claim a newer version.
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            info!(
                "client requested older protocol version {}, using it",
                request.protocol_version
            );
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!("MCP session initialized with protocol version {}", negotiated);

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "elefante".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some({
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                }),
                resources: None,
                prompts: None,
            },
            instructions: Some(
                "Elefante is the agent's persistent memory. Use memory.add to record \
                 knowledge (supply layer/sublayer and entities when you know them), \
                 memory.search for hybrid recall, and context.record to log session \
                 messages so pronoun-heavy follow-up queries resolve correctly."
                    .to_string(),
            ),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_list(&self) -> Result<serde_json::Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "memory.add".to_string(),
                description: Some(
                    "Commit a memory to both indices. Deduplicates by canonical \
                     Subject-Aspect-Qualifier title; repeats reinforce instead of duplicating."
                        .to_string(),
                ),
                input_schema: tools::add::schema(),
            },
            ToolDescription {
                name: "memory.search".to_string(),
                description: Some(
                    "Hybrid retrieval fusing the vector index, the property graph, and \
                     the current session window, with temporal-decay reweighting."
                        .to_string(),
                ),
                input_schema: tools::search::schema(),
            },
            ToolDescription {
                name: "memory.list_all".to_string(),
                description: Some(
                    "Exact unfiltered enumeration in insertion order (export path); \
                     never ranked by relevance.".to_string(),
                ),
                input_schema: tools::list_all::schema(),
            },
            ToolDescription {
                name: "memory.consolidate".to_string(),
                description: Some(
                    "Collapse title duplicates, archive decayed memories, reconcile \
                     half-written orphans. Dry-run by default; force=true applies."
                        .to_string(),
                ),
                input_schema: tools::consolidate::schema(),
            },
            ToolDescription {
                name: "graph.query".to_string(),
                description: Some(
                    "Read-only parameterized query against the graph schema.".to_string(),
                ),
                input_schema: tools::graph::query_schema(),
            },
            ToolDescription {
                name: "graph.entity.create".to_string(),
                description: Some(
                    "Create or merge an entity node (merge key: name + entityType)."
                        .to_string(),
                ),
                input_schema: tools::graph::entity_schema(),
            },
            ToolDescription {
                name: "graph.relationship.create".to_string(),
                description: Some(
                    "Create a typed relationship between two existing nodes.".to_string(),
                ),
                input_schema: tools::graph::relationship_schema(),
            },
            ToolDescription {
                name: "context.get".to_string(),
                description: Some(
                    "Session context: trailing messages, attached memories, and their \
                     graph neighborhood.".to_string(),
                ),
                input_schema: tools::context::get_schema(),
            },
            ToolDescription {
                name: "context.record".to_string(),
                description: Some(
                    "Append a message to a session's log (feeds conversation-aware \
                     retrieval).".to_string(),
                ),
                input_schema: tools::context::record_schema(),
            },
            ToolDescription {
                name: "sessions.list".to_string(),
                description: Some("Stored session summaries, newest first.".to_string()),
                input_schema: tools::sessions::schema(),
            },
            ToolDescription {
                name: "system.status".to_string(),
                description: Some(
                    "Lock state, holder record, and store counts.".to_string(),
                ),
                input_schema: tools::status::schema(),
            },
        ];

        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call params")),
        };

        let engine = &self.engine;
        let outcome = match request.name.as_str() {
            "memory.add" => tools::add::execute(engine, request.arguments).await,
            "memory.search" => tools::search::execute(engine, request.arguments).await,
            "memory.list_all" => tools::list_all::execute(engine, request.arguments).await,
            "memory.consolidate" => {
                tools::consolidate::execute(engine, request.arguments).await
            }
            "graph.query" => tools::graph::execute_query(engine, request.arguments).await,
            "graph.entity.create" => {
                tools::graph::execute_entity_create(engine, request.arguments).await
            }
            "graph.relationship.create" => {
                tools::graph::execute_relationship_create(engine, request.arguments).await
            }
            "context.get" => tools::context::execute_get(engine, request.arguments).await,
            "context.record" => {
                tools::context::execute_record(engine, request.arguments).await
            }
            "sessions.list" => tools::sessions::execute(engine, request.arguments).await,
            "system.status" => tools::status::execute(engine, request.arguments).await,
            unknown => Err(format!("unknown tool '{}'", unknown)),
        };

        let result = match outcome {
            Ok(value) => CallToolResult::from_value(&value),
            Err(message) => {
                warn!("tool '{}' failed: {}", request.name, message);
                CallToolResult::from_error(&message)
            }
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_engine;

    fn request(method: &str, params: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    async fn initialized_server() -> (McpServer, tempfile::TempDir) {
        let (engine, dir) = test_engine();
        let mut server = McpServer::new(engine);
        server
            .handle_request(request("initialize", serde_json::json!({})))
            .await;
        (server, dir)
    }

    #[tokio::test]
    async fn test_requires_initialize_first() {
        let (engine, _dir) = test_engine();
        let mut server = McpServer::new(engine);
        let response = server
            .handle_request(request("tools/list", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32002);
    }

    #[tokio::test]
    async fn test_tools_list_exposes_canonical_set() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("tools/list", serde_json::json!({})))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<String> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        for expected in [
            "memory.add",
            "memory.search",
            "memory.list_all",
            "memory.consolidate",
            "graph.query",
            "graph.entity.create",
            "graph.relationship.create",
            "context.get",
            "sessions.list",
            "system.status",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_tool_call_roundtrip() {
        let (mut server, _dir) = initialized_server().await;
        let params = serde_json::json!({
            "name": "memory.add",
            "arguments": { "content": "server roundtrip check" }
        });
        let response = server
            .handle_request(request("tools/call", params))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert!(result["isError"].is_null());
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("created"));
    }

    #[tokio::test]
    async fn test_unknown_tool_flagged_as_error() {
        let (mut server, _dir) = initialized_server().await;
        let params = serde_json::json!({ "name": "memory.telepathy", "arguments": {} });
        let response = server
            .handle_request(request("tools/call", params))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (mut server, _dir) = initialized_server().await;
        let response = server
            .handle_request(request("wormholes/open", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
