//! Engine facade
//!
//! Long-lived process-wide state: `open(config, embedder)` wires the
//! adapters, lock manager, orchestrator, pipeline, and consolidator over one
//! data directory; `close()` flushes deferred access bumps. All public
//! operations take `&self`; the engine is `Send + Sync` and lives behind an
//! `Arc` in the server layer.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::consolidate::{ConsolidationReport, Consolidator};
use crate::embeddings::Embedder;
use crate::error::{Backend, EngineError, Result};
use crate::graph::{GraphStore, LocalGraphStore, Neighbor};
use crate::ingest::{AddMemoryInput, AddOutcome, IngestionPipeline};
use crate::lock::{LockHolder, LockManager};
use crate::memory::{
    Memory, MemoryFilter, Message, Relationship, RelType, Role, SessionSummary, StoreCounts,
};
use crate::search::{Orchestrator, SearchOptions, SearchResponse};
use crate::vector::{memory_from_parts, LocalVectorStore, VectorStore};

/// Engine status reported by `system.status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<LockHolder>,
    pub counts: StoreCounts,
    pub pending_access_bumps: usize,
    pub version: String,
}

/// Session context bundle returned by `context.get`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub memories: Vec<Memory>,
    pub neighborhood: Vec<Neighbor>,
}

/// The memory engine: owns open backend handles and composes them for
/// end-user operations.
pub struct MemoryEngine {
    config: EngineConfig,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    lock: LockManager,
    orchestrator: Orchestrator,
    pipeline: Arc<IngestionPipeline>,
    consolidator: Arc<Consolidator>,
}

impl MemoryEngine {
    /// Open the engine over `config.data_dir` with an injected embedder.
    ///
    /// The embedder's dimension must equal the configured constant.
    pub fn open(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dimension() != config.embedding_dim {
            return Err(EngineError::invalid(
                "embedding_dim",
                format!(
                    "embedder produces {} dimensions, configured {}",
                    embedder.dimension(),
                    config.embedding_dim
                ),
            ));
        }

        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| EngineError::Internal(format!("create data dir: {}", e)))?;

        let vector: Arc<dyn VectorStore> = Arc::new(
            LocalVectorStore::open(&config.vector_dir(), config.embedding_dim).map_err(
                |e| EngineError::BackendUnavailable {
                    backend: Backend::Vector,
                    reason: e.to_string(),
                },
            )?,
        );
        let graph: Arc<dyn GraphStore> = Arc::new(
            LocalGraphStore::open(&config.graph_dir()).map_err(|e| {
                EngineError::BackendUnavailable {
                    backend: Backend::Graph,
                    reason: e.to_string(),
                }
            })?,
        );
        let lock = LockManager::new(
            config.lock_path(),
            config.lock_stale(),
            config.lock_acquire_timeout(),
        );

        let orchestrator = Orchestrator::new(
            config.clone(),
            Arc::clone(&embedder),
            Arc::clone(&vector),
            Arc::clone(&graph),
        );
        let pipeline = Arc::new(IngestionPipeline::new(
            config.clone(),
            Arc::clone(&embedder),
            Arc::clone(&vector),
            Arc::clone(&graph),
            lock.clone(),
        ));
        let consolidator = Arc::new(Consolidator::new(
            config.clone(),
            Arc::clone(&embedder),
            Arc::clone(&vector),
            Arc::clone(&graph),
            lock.clone(),
        ));

        info!(data_dir = %config.data_dir.display(), "memory engine opened");
        Ok(Self {
            config,
            vector,
            graph,
            lock,
            orchestrator,
            pipeline,
            consolidator,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Retrieval
    // ------------------------------------------------------------------

    /// Hybrid search (§ orchestrator). Read path; never takes the write lock.
    pub async fn search(
        &self,
        query: &str,
        filter: &MemoryFilter,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.orchestrator.search(query, filter, options).await
    }

    /// Exact unfiltered enumeration (export/consolidation path), with an
    /// optional post-filter. Never ranks by relevance.
    pub async fn list_all(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<MemoryFilter>,
    ) -> Result<Vec<Memory>> {
        let vector = Arc::clone(&self.vector);
        let limit = limit.min(self.config.retrieval_max_limit.max(1));
        tokio::task::spawn_blocking(move || {
            let records =
                vector
                    .get_all(offset, limit)
                    .map_err(|e| EngineError::BackendUnavailable {
                        backend: Backend::Vector,
                        reason: e.to_string(),
                    })?;
            let mut memories = Vec::with_capacity(records.len());
            for record in records {
                let Ok(memory) = memory_from_parts(&record.id, &record.content, &record.metadata)
                else {
                    continue;
                };
                if filter.as_ref().is_none_or(|f| f.matches(&memory)) {
                    memories.push(memory);
                }
            }
            Ok(memories)
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    /// One memory by id, vector record first, graph node as fallback
    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        if let Ok(Some(record)) = self.vector.get(id) {
            if let Ok(memory) = memory_from_parts(id, &record.content, &record.metadata) {
                return Ok(Some(memory));
            }
        }
        self.graph
            .memory(id)
            .map_err(|e| EngineError::BackendUnavailable {
                backend: Backend::Graph,
                reason: e.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Commit (or reinforce) one memory through the full pipeline
    pub async fn add_memory(&self, input: AddMemoryInput) -> Result<AddOutcome> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || pipeline.add_memory(input))
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    /// Append a message to a session's log
    pub async fn record_message(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
    ) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(EngineError::invalid("session_id", "empty"));
        }
        if text.trim().is_empty() {
            return Err(EngineError::invalid("text", "empty"));
        }
        let message = Message {
            session_id: session_id.to_string(),
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        let graph = Arc::clone(&self.graph);
        tokio::task::spawn_blocking(move || {
            graph
                .append_message(&message)
                .map_err(|e| EngineError::BackendWriteFailed {
                    backend: Backend::Graph,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    // ------------------------------------------------------------------
    // Graph surface
    // ------------------------------------------------------------------

    /// Create (or merge) an entity node
    pub fn entity_create(
        &self,
        name: &str,
        entity_type: &str,
        props: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<String> {
        if name.trim().is_empty() {
            return Err(EngineError::invalid("name", "empty"));
        }
        if entity_type.trim().is_empty() {
            return Err(EngineError::invalid("entity_type", "empty"));
        }
        let serialized = match props {
            Some(map) => Some(crate::graph::serialize_props(map).map_err(graph_err)?),
            None => None,
        };
        self.graph
            .upsert_entity(name.trim(), entity_type.trim(), serialized.as_deref())
            .map_err(graph_err)
    }

    /// Create (or refresh) a relationship edge
    pub fn relationship_create(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: &str,
        props: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let Some(rel_type) = RelType::parse(rel_type) else {
            return Err(EngineError::invalid(
                "rel_type",
                format!("unknown relationship type '{}'", rel_type),
            ));
        };
        let serialized = match props {
            Some(map) => Some(crate::graph::serialize_props(map).map_err(graph_err)?),
            None => None,
        };
        let edge = Relationship {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            rel_type,
            weight: None,
            props: serialized,
            created_at: Utc::now(),
        };
        self.graph.upsert_edge(&edge).map_err(graph_err)
    }

    /// Read-only parameterized query against the graph schema
    pub fn graph_query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        self.graph.query(statement, params).map_err(|e| match e {
            crate::graph::GraphStoreError::SchemaMismatch(reason) => {
                EngineError::invalid("statement", reason)
            }
            other => graph_err(other),
        })
    }

    /// Session context: trailing messages, attached memories, and their
    /// graph neighborhood
    pub async fn context(
        &self,
        session_id: &str,
        depth: u8,
        limit: usize,
    ) -> Result<ContextBundle> {
        if session_id.trim().is_empty() {
            return Err(EngineError::invalid("session_id", "empty"));
        }
        let graph = Arc::clone(&self.graph);
        let session_id = session_id.to_string();
        let window = self.config.conversation_window;
        let limit = limit.clamp(1, self.config.retrieval_max_limit);
        tokio::task::spawn_blocking(move || {
            let messages = graph
                .recent_messages(&session_id, window)
                .map_err(graph_err)?;
            let mut ids = graph.session_memory_ids(&session_id).map_err(graph_err)?;
            ids.truncate(limit);

            let mut memories = Vec::with_capacity(ids.len());
            let mut neighborhood = Vec::new();
            for id in &ids {
                if let Some(memory) = graph.memory(id).map_err(graph_err)? {
                    neighborhood
                        .extend(graph.neighborhood(id, depth, limit).map_err(graph_err)?);
                    memories.push(memory);
                }
            }
            neighborhood.retain(|n| n.id != session_id);
            Ok(ContextBundle {
                session_id,
                messages,
                memories,
                neighborhood,
            })
        })
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    /// Stored session summaries, newest first
    pub fn sessions(&self, offset: usize, limit: usize) -> Result<Vec<SessionSummary>> {
        self.graph
            .sessions(offset, limit.clamp(1, self.config.retrieval_max_limit))
            .map_err(graph_err)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Run a consolidation pass (dry-run unless `force`)
    pub async fn consolidate(&self, force: bool) -> Result<ConsolidationReport> {
        // Deferred access bumps first so strength is computed on fresh state
        self.orchestrator.flush_pending_bumps().await;
        let consolidator = Arc::clone(&self.consolidator);
        tokio::task::spawn_blocking(move || consolidator.run(force))
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?
    }

    /// Export a graph snapshot under `{data_dir}/snapshots/`
    pub fn export_snapshot(&self) -> Result<std::path::PathBuf> {
        let snapshot = self.graph.export_snapshot().map_err(graph_err)?;
        let dir = self.config.snapshot_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| EngineError::Internal(format!("create snapshot dir: {}", e)))?;
        let path = dir.join(format!("graph-{}.json", Utc::now().timestamp_millis()));
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap_or_default())
            .map_err(|e| EngineError::Internal(format!("write snapshot: {}", e)))?;
        Ok(path)
    }

    /// Lock state and store counts
    pub fn status(&self) -> Result<SystemStatus> {
        let mut counts = self.graph.counts().map_err(graph_err)?;
        counts.vector_records = self
            .vector
            .count()
            .map_err(|e| EngineError::BackendUnavailable {
                backend: Backend::Vector,
                reason: e.to_string(),
            })?;
        Ok(SystemStatus {
            locked: self.lock.is_locked(),
            holder: self.lock.current_holder(),
            counts,
            pending_access_bumps: self.orchestrator.pending_bump_count(),
            version: crate::VERSION.to_string(),
        })
    }

    /// Flush deferred state. The engine holds no lock between operations,
    /// so closing releases nothing else.
    pub async fn close(&self) {
        self.orchestrator.flush_pending_bumps().await;
        info!("memory engine closed");
    }
}

fn graph_err(e: crate::graph::GraphStoreError) -> EngineError {
    match e {
        crate::graph::GraphStoreError::ReservedWord { name } => {
            EngineError::invalid("props", format!("reserved property name '{}'", name))
        }
        crate::graph::GraphStoreError::EndpointMissing { id } => {
            EngineError::invalid("relationship", format!("endpoint '{}' does not exist", id))
        }
        other => EngineError::BackendUnavailable {
            backend: Backend::Graph,
            reason: other.to_string(),
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use tempfile::TempDir;

    const DIM: usize = 64;

    async fn engine() -> (MemoryEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.embedding_dim = DIM;
        let engine = MemoryEngine::open(config, Arc::new(HashEmbedder::new(DIM))).unwrap();
        (engine, dir)
    }

    fn add(content: &str, title: &str) -> AddMemoryInput {
        AddMemoryInput {
            content: content.to_string(),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_open_rejects_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::with_data_dir(dir.path()); // 384 by default
        let result = MemoryEngine::open(config, Arc::new(HashEmbedder::new(64)));
        assert!(matches!(
            result,
            Err(EngineError::InvalidInput { field: "embedding_dim", .. })
        ));
    }

    #[tokio::test]
    async fn test_add_then_search_finds_it() {
        let (engine, _dir) = engine().await;
        let outcome = engine
            .add_memory(add("I prefer dark mode IDE themes", "Self-Pref-DarkMode"))
            .await
            .unwrap();

        let response = engine
            .search(
                "dark mode themes",
                &MemoryFilter::default(),
                &SearchOptions::default(),
            )
            .await
            .unwrap();
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].memory.id, outcome.id);
        assert!(!response.partial);
    }

    #[tokio::test]
    async fn test_search_bumps_access_counts() {
        let (engine, _dir) = engine().await;
        let outcome = engine
            .add_memory(add("tokio tasks must be Send", "Tokio-Fact-Send"))
            .await
            .unwrap();

        engine
            .search(
                "tokio tasks",
                &MemoryFilter::default(),
                &SearchOptions::default(),
            )
            .await
            .unwrap();

        let memory = engine.get_memory(&outcome.id).unwrap().unwrap();
        assert_eq!(memory.access_count, 2); // 1 at creation + 1 retrieval bump
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (engine, _dir) = engine().await;
        let result = engine
            .search("   ", &MemoryFilter::default(), &SearchOptions::default())
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidInput { field: "query", .. })
        ));
    }

    #[tokio::test]
    async fn test_list_all_enumerates_in_insertion_order() {
        let (engine, _dir) = engine().await;
        let a = engine.add_memory(add("alpha content", "A-Fact-One")).await.unwrap();
        let b = engine.add_memory(add("beta content", "B-Fact-Two")).await.unwrap();

        let all = engine.list_all(0, 100, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let (engine, _dir) = engine().await;
        engine.add_memory(add("one", "T-One")).await.unwrap();
        engine.add_memory(add("two", "T-Two")).await.unwrap();
        engine.entity_create("Omega", "project", None).unwrap();

        let status = engine.status().unwrap();
        assert!(!status.locked);
        assert_eq!(status.counts.memories_active, 2);
        assert_eq!(status.counts.entities, 1);
        assert_eq!(status.counts.vector_records, 2);
    }

    #[tokio::test]
    async fn test_context_bundle() {
        let (engine, _dir) = engine().await;
        engine
            .record_message("sess-1", Role::User, "we talked about Omega")
            .await
            .unwrap();
        let mut input = add("Omega launches in May", "Omega-Goal-Launch");
        input.session_id = Some("sess-1".to_string());
        engine.add_memory(input).await.unwrap();

        let bundle = engine.context("sess-1", 1, 10).await.unwrap();
        assert_eq!(bundle.messages.len(), 1);
        assert_eq!(bundle.memories.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_query_is_read_only() {
        let (engine, _dir) = engine().await;
        engine.add_memory(add("queryable", "Q-Fact-One")).await.unwrap();

        let rows = engine
            .graph_query("SELECT COUNT(*) AS n FROM memory_nodes", &[])
            .unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(1));

        assert!(matches!(
            engine.graph_query("DROP TABLE memory_nodes", &[]),
            Err(EngineError::InvalidInput { field: "statement", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_rel_type_rejected() {
        let (engine, _dir) = engine().await;
        let result = engine.relationship_create("a", "b", "friends_with", None);
        assert!(matches!(
            result,
            Err(EngineError::InvalidInput { field: "rel_type", .. })
        ));
    }
}
