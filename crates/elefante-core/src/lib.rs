//! # Elefante Core
//!
//! Local, single-user persistent memory engine for an AI agent. Short text
//! memories are committed to dual indices and retrieved through a hybrid
//! orchestrator that fuses both with short-term conversational context:
//!
//! - **Hybrid retrieval**: deterministic lexical query classification,
//!   parallel dispatch to the vector index, the property graph, and the
//!   session window, min-max score normalization, temporal-decay
//!   reweighting, and deduplicated top-K merging.
//! - **Intelligent ingestion**: layered `self`/`world`/`intent` taxonomy,
//!   canonical Subject-Aspect-Qualifier titles as the dedup key,
//!   reinforcement on re-observation, and an atomic dual-write with
//!   best-effort compensation.
//! - **Crash-safe locking**: a transaction-scoped `write.lock` protocol with
//!   stale-holder expiry and PID liveness, so several agent processes can
//!   interleave against the single-writer graph store. Reads never wait.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use elefante_core::{AddMemoryInput, EngineConfig, HashEmbedder, MemoryEngine};
//!
//! # async fn demo() -> elefante_core::Result<()> {
//! let config = EngineConfig::from_env();
//! let embedder = Arc::new(HashEmbedder::new(config.embedding_dim));
//! let engine = MemoryEngine::open(config, embedder)?;
//!
//! let outcome = engine
//!     .add_memory(AddMemoryInput {
//!         content: "I prefer dark mode IDEs".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("stored as {} ({:?})", outcome.id, outcome.action);
//!
//! let results = engine
//!     .search("editor preferences", &Default::default(), &Default::default())
//!     .await?;
//! for hit in results.results {
//!     println!("{:.3}  {}", hit.score, hit.memory.title);
//! }
//! engine.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `local-embeddings` (default): fastembed-backed 384-dimensional local
//!   inference. Disable it to inject your own [`Embedder`].

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod consolidate;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod lock;
pub mod memory;
pub mod search;
pub mod session;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{EngineConfig, DEFAULT_EMBEDDING_DIM};
pub use engine::{ContextBundle, MemoryEngine, SystemStatus};
pub use error::{Backend, EngineError, Result};

pub use memory::{
    content_hash, normalize_tags, Entity, Kind, Layer, Memory, MemoryFilter, Message, RelType,
    Relationship, Role, SaqTitle, SessionSummary, Status, StoreCounts, Sublayer,
    MAX_CONTENT_CHARS, MAX_TITLE_CHARS,
};

pub use embeddings::{
    cosine_similarity, embedding_from_bytes, embedding_to_bytes, Embedder, EmbedderError,
    HashEmbedder,
};

#[cfg(feature = "local-embeddings")]
pub use embeddings::LocalEmbedder;

pub use vector::{
    flatten_json, memory_from_parts, memory_to_metadata, LocalVectorStore, MetaValue, Metadata,
    VectorQueryHit, VectorRecord, VectorResult, VectorStore, VectorStoreError,
};

pub use graph::{
    is_reserved_property, parse_timestamp, serialize_props, GraphResult, GraphStore,
    GraphStoreError, LabelMatch, LocalGraphStore, Neighbor, NodeTable,
    RESERVED_PROPERTY_NAMES,
};

pub use lock::{LockError, LockHolder, LockManager, WriteGuard};

pub use search::{
    classify_query, QueryPlan, SearchHit, SearchMode, SearchOptions, SearchResponse, Source,
    SubScores,
};

pub use session::{jaccard, tokens, ConversationCandidate, ConversationContext};

pub use ingest::{
    AddAction, AddMemoryInput, AddOutcome, EntityInput, IngestionPipeline, RelationshipInput,
};

pub use consolidate::{
    ConsolidationAction, ConsolidationReport, ConsolidationStats, Consolidator,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AddAction, AddMemoryInput, AddOutcome, Embedder, EngineConfig, EngineError, Kind,
        Layer, Memory, MemoryEngine, MemoryFilter, Result, Role, SearchMode, SearchOptions,
        SearchResponse, Status, Sublayer,
    };

    pub use crate::HashEmbedder;

    #[cfg(feature = "local-embeddings")]
    pub use crate::LocalEmbedder;
}
