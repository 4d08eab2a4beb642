//! MCP protocol layer: JSON-RPC framing, message bodies, stdio transport

pub mod messages;
pub mod stdio;
pub mod types;
