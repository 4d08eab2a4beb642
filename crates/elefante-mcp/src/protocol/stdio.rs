//! stdio transport
//!
//! Newline-delimited JSON-RPC over the async runtime's stdin/stdout (the
//! crate's `io-std` tokio feature). Logging goes to stderr so stdout stays
//! protocol-clean. Frames above the size cap are answered with an error
//! instead of being buffered into the parser.

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// Largest request frame accepted, in bytes
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// stdio transport for the MCP server
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Pump frames until stdin closes
    pub async fn run(self, mut server: McpServer) -> Result<(), io::Error> {
        let mut frames = BufReader::new(io::stdin()).lines();
        let mut stdout = io::stdout();

        while let Some(line) = frames.next_line().await? {
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }
            if frame.len() > MAX_FRAME_BYTES {
                warn!("rejecting oversized frame ({} bytes)", frame.len());
                let response = JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_params("request frame too large"),
                );
                send(&mut stdout, &response).await?;
                continue;
            }
            debug!("frame in: {} bytes", frame.len());

            let response = match serde_json::from_str::<JsonRpcRequest>(frame) {
                Ok(request) => server.handle_request(request).await,
                Err(e) => {
                    warn!("unparsable frame: {}", e);
                    Some(JsonRpcResponse::error(None, JsonRpcError::parse_error()))
                }
            };
            if let Some(response) = response {
                send(&mut stdout, &response).await?;
            }
        }

        debug!("stdin closed; transport draining");
        stdout.flush().await
    }
}

/// Write one response frame, falling back to a minimal error envelope so
/// the client never hangs waiting for a reply we failed to serialize.
async fn send(stdout: &mut Stdout, response: &JsonRpcResponse) -> Result<(), io::Error> {
    let mut frame = match serde_json::to_vec(response) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("failed to serialize response: {}", e);
            let envelope = JsonRpcResponse::error(
                response.id.clone(),
                JsonRpcError::internal_error("unserializable response"),
            );
            serde_json::to_vec(&envelope).unwrap_or_default()
        }
    };
    frame.push(b'\n');
    debug!("frame out: {} bytes", frame.len());
    stdout.write_all(&frame).await?;
    stdout.flush().await
}
