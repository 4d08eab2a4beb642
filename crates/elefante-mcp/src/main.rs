//! Elefante MCP server - persistent memory for AI agents
//!
//! A Model Context Protocol server over stdio exposing the hybrid
//! vector/graph retrieval engine:
//!
//! - Dual-indexed storage: HNSW vector index + labeled property graph
//! - Deterministic query classification and weighted score fusion
//! - SAQ-title deduplication with reinforcement on re-observation
//! - Crash-safe multi-process write locking with stale-holder steal
//! - Session-aware retrieval (one-hour half-life conversation context)

mod protocol;
mod server;
mod tools;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use elefante_core::{Embedder, EngineConfig, HashEmbedder, MemoryEngine};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;

/// Parse command-line arguments, returning an optional data directory.
/// Exits the process for `--help` / `--version`.
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Elefante MCP Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Persistent memory engine for AI agents over the Model Context Protocol.");
                println!();
                println!("USAGE:");
                println!("    elefante-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory (default: ~/.elefante/data)");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                           Log level filter");
                println!("    ELEFANTE_DATA_DIR                  Same as --data-dir");
                println!("    ELEFANTE_EMBEDDING_DIM             Embedding dimension (default 384)");
                println!("    ELEFANTE_CONSOLIDATE_INTERVAL_HOURS  Background pass interval (default 6)");
                println!("    ELEFANTE_AUTO_CONSOLIDATE          Set to 0 to disable the background pass");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("elefante-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'elefante-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    data_dir
}

/// Pick the embedder: local ONNX inference when the feature is on, the
/// deterministic hash projection otherwise.
fn build_embedder(config: &EngineConfig) -> Arc<dyn Embedder> {
    #[cfg(feature = "local-embeddings")]
    {
        use elefante_core::LocalEmbedder;
        let local = LocalEmbedder::new();
        if local.dimension() == config.embedding_dim {
            match local.warm_up() {
                Ok(()) => {
                    info!("local embedding model ready");
                    return Arc::new(local);
                }
                Err(e) => {
                    warn!("local embedder unavailable, falling back to hash embedder: {}", e);
                }
            }
        } else {
            warn!(
                "local embedder produces {} dims but {} configured; using hash embedder",
                local.dimension(),
                config.embedding_dim
            );
        }
    }
    Arc::new(HashEmbedder::new(config.embedding_dim))
}

#[tokio::main]
async fn main() {
    // Arguments first so --help/--version work before logging starts
    let data_dir = parse_args();

    // Logs to stderr; stdout is reserved for JSON-RPC
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Elefante MCP server v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = EngineConfig::from_env();
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    let embedder = build_embedder(&config);

    let engine = match MemoryEngine::open(config, embedder) {
        Ok(engine) => {
            info!("memory engine initialized");
            Arc::new(engine)
        }
        Err(e) => {
            error!("failed to initialize memory engine: {}", e);
            std::process::exit(1);
        }
    };

    // Periodic consolidation keeps decay scores and orphan repair current.
    // ELEFANTE_AUTO_CONSOLIDATE=0 disables it.
    let auto_consolidate = std::env::var("ELEFANTE_AUTO_CONSOLIDATE")
        .map(|v| v != "0")
        .unwrap_or(true);
    if auto_consolidate {
        let engine_clone = Arc::clone(&engine);
        tokio::spawn(async move {
            let interval_hours: u64 = std::env::var("ELEFANTE_CONSOLIDATE_INTERVAL_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6);

            // Small delay so the stdio handshake is not blocked
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            loop {
                match engine_clone.consolidate(true).await {
                    Ok(report) => {
                        info!(
                            duplicates = report.stats.duplicates_collapsed,
                            archived = report.stats.archived,
                            orphans = report.stats.orphans_reconciled,
                            duration_ms = report.stats.duration_ms,
                            "periodic consolidation complete"
                        );
                    }
                    Err(e) => {
                        warn!("periodic consolidation failed: {}", e);
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(interval_hours * 3600)).await;
            }
        });
    }

    let server = McpServer::new(Arc::clone(&engine));
    let transport = StdioTransport::new();

    info!("starting MCP server on stdio...");
    if let Err(e) = transport.run(server).await {
        error!("server error: {}", e);
        engine.close().await;
        std::process::exit(1);
    }

    engine.close().await;
    info!("Elefante MCP server shutting down");
}
