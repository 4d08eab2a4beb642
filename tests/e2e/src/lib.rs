//! End-to-end test harness
//!
//! Shared fixtures for the scenario suite: an engine over a temporary data
//! directory with the deterministic hash embedder, plus a graph-store
//! wrapper that injects write failures for compensation testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use elefante_core::{
    AddMemoryInput, EngineConfig, GraphResult, GraphStore, GraphStoreError, HashEmbedder,
    MemoryEngine,
};
use tempfile::TempDir;

/// Embedding dimension used across the suite
pub const DIM: usize = 64;

/// Build a test configuration rooted at `dir`
pub fn test_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::with_data_dir(dir.path());
    config.embedding_dim = DIM;
    config
}

/// Engine over a fresh temporary data directory
pub fn fresh_engine() -> (Arc<MemoryEngine>, TempDir) {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir);
    (engine, dir)
}

/// A second (or later) engine handle over an existing data directory,
/// simulating another agent process
pub fn engine_at(dir: &TempDir) -> Arc<MemoryEngine> {
    let config = test_config(dir);
    Arc::new(MemoryEngine::open(config, Arc::new(HashEmbedder::new(DIM))).unwrap())
}

/// Minimal add input
pub fn add(content: &str, title: &str) -> AddMemoryInput {
    AddMemoryInput {
        content: content.to_string(),
        title: Some(title.to_string()),
        ..Default::default()
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Graph-store wrapper that fails the next N memory upserts, then delegates
pub struct FailingGraphStore<G: GraphStore> {
    inner: G,
    failures_left: AtomicUsize,
}

impl<G: GraphStore> FailingGraphStore<G> {
    pub fn new(inner: G, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }

    fn maybe_fail(&self) -> GraphResult<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(GraphStoreError::WriteFailed(
                "injected failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl<G: GraphStore> GraphStore for FailingGraphStore<G> {
    fn upsert_memory(&self, memory: &elefante_core::Memory) -> GraphResult<()> {
        self.maybe_fail()?;
        self.inner.upsert_memory(memory)
    }

    fn memory(&self, id: &str) -> GraphResult<Option<elefante_core::Memory>> {
        self.inner.memory(id)
    }

    fn memory_by_title(
        &self,
        title: &str,
        status: elefante_core::Status,
    ) -> GraphResult<Option<elefante_core::Memory>> {
        self.inner.memory_by_title(title, status)
    }

    fn memory_by_hash(
        &self,
        content_hash: &str,
        status: elefante_core::Status,
    ) -> GraphResult<Option<elefante_core::Memory>> {
        self.inner.memory_by_hash(content_hash, status)
    }

    fn memories_with_status(
        &self,
        status: elefante_core::Status,
    ) -> GraphResult<Vec<elefante_core::Memory>> {
        self.inner.memories_with_status(status)
    }

    fn delete_memory(&self, id: &str) -> GraphResult<bool> {
        self.inner.delete_memory(id)
    }

    fn upsert_entity(
        &self,
        name: &str,
        entity_type: &str,
        props: Option<&str>,
    ) -> GraphResult<String> {
        self.inner.upsert_entity(name, entity_type, props)
    }

    fn entity(&self, id: &str) -> GraphResult<Option<elefante_core::Entity>> {
        self.inner.entity(id)
    }

    fn upsert_session(
        &self,
        session_id: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> GraphResult<()> {
        self.inner.upsert_session(session_id, at)
    }

    fn append_message(&self, message: &elefante_core::Message) -> GraphResult<()> {
        self.inner.append_message(message)
    }

    fn recent_messages(
        &self,
        session_id: &str,
        n: usize,
    ) -> GraphResult<Vec<elefante_core::Message>> {
        self.inner.recent_messages(session_id, n)
    }

    fn sessions(
        &self,
        offset: usize,
        limit: usize,
    ) -> GraphResult<Vec<elefante_core::SessionSummary>> {
        self.inner.sessions(offset, limit)
    }

    fn session_memory_ids(&self, session_id: &str) -> GraphResult<Vec<String>> {
        self.inner.session_memory_ids(session_id)
    }

    fn upsert_edge(&self, relationship: &elefante_core::Relationship) -> GraphResult<()> {
        self.inner.upsert_edge(relationship)
    }

    fn edges_from(&self, id: &str) -> GraphResult<Vec<elefante_core::Relationship>> {
        self.inner.edges_from(id)
    }

    fn find_by_label(
        &self,
        needle: &str,
        k: usize,
    ) -> GraphResult<Vec<elefante_core::LabelMatch>> {
        self.inner.find_by_label(needle, k)
    }

    fn neighborhood(
        &self,
        id: &str,
        depth: u8,
        limit: usize,
    ) -> GraphResult<Vec<elefante_core::Neighbor>> {
        self.inner.neighborhood(id, depth, limit)
    }

    fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> GraphResult<Vec<serde_json::Map<String, serde_json::Value>>> {
        self.inner.query(statement, params)
    }

    fn counts(&self) -> GraphResult<elefante_core::StoreCounts> {
        self.inner.counts()
    }

    fn export_snapshot(&self) -> GraphResult<serde_json::Value> {
        self.inner.export_snapshot()
    }
}
