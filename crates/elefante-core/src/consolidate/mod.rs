//! Consolidation
//!
//! Periodic maintenance over both indices: collapse active title
//! duplicates onto their canonical record, archive memories whose temporal
//! strength fell below the configured floor, and reconcile half-written
//! orphans left behind by failed dual-writes. `force=false` is a pure
//! inspection that proposes actions; `force=true` applies them, and applying
//! twice yields the same state as applying once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::embeddings::Embedder;
use crate::error::{Backend, EngineError, Result};
use crate::graph::GraphStore;
use crate::lock::LockManager;
use crate::memory::{Memory, RelType, Relationship, Status};
use crate::vector::{memory_from_parts, memory_to_metadata, VectorRecord, VectorStore};

/// Page size for the orphan scan over the vector store
const SCAN_PAGE: usize = 512;

// ============================================================================
// REPORT TYPES
// ============================================================================

/// One proposed (or applied) consolidation action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConsolidationAction {
    /// A title duplicate collapses onto its canonical record
    MarkRedundant { id: String, canonical: String },
    /// Temporal strength fell below the archive floor
    Archive { id: String, strength: f64 },
    /// A record existed in only one index; repaired from the surviving side
    ReconcileOrphan { id: String, side: String },
}

/// Counters for one consolidation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationStats {
    pub examined: i64,
    pub duplicates_collapsed: i64,
    pub archived: i64,
    pub orphans_reconciled: i64,
    pub duration_ms: i64,
}

/// Outcome of `consolidate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    /// True when nothing was mutated (default)
    pub dry_run: bool,
    pub stats: ConsolidationStats,
    pub actions: Vec<ConsolidationAction>,
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

/// Runs consolidation passes over both indices
pub struct Consolidator {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    lock: LockManager,
}

impl Consolidator {
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        lock: LockManager,
    ) -> Self {
        Self {
            config,
            embedder,
            vector,
            graph,
            lock,
        }
    }

    /// Run one pass. `force=false` only reports; `force=true` applies.
    pub fn run(&self, force: bool) -> Result<ConsolidationReport> {
        let started = std::time::Instant::now();
        let mut stats = ConsolidationStats::default();
        let actions = self.plan(&mut stats)?;

        if force && !actions.is_empty() {
            let guard = self
                .lock
                .acquire_with_timeout(self.config.lock_acquire_timeout())
                .map_err(|e| match e {
                    crate::lock::LockError::Unavailable { holder } => {
                        EngineError::LockUnavailable { holder }
                    }
                    crate::lock::LockError::Io(io) => EngineError::Internal(io.to_string()),
                })?;
            for action in &actions {
                self.apply(action)?;
            }
            drop(guard);
            info!(
                duplicates = stats.duplicates_collapsed,
                archived = stats.archived,
                orphans = stats.orphans_reconciled,
                "consolidation applied"
            );
        }

        stats.duration_ms = started.elapsed().as_millis() as i64;
        Ok(ConsolidationReport {
            dry_run: !force,
            stats,
            actions,
        })
    }

    /// Pure inspection: compute the action list without mutating anything
    fn plan(&self, stats: &mut ConsolidationStats) -> Result<Vec<ConsolidationAction>> {
        let mut actions = Vec::new();
        let active = self
            .graph
            .memories_with_status(Status::Active)
            .map_err(graph_unavailable)?;
        stats.examined = active.len() as i64;

        // Title duplicates: canonical is the oldest record (then smallest id)
        let mut by_title: HashMap<&str, Vec<&Memory>> = HashMap::new();
        for memory in &active {
            by_title.entry(memory.title.as_str()).or_default().push(memory);
        }
        let mut redundant_ids: std::collections::HashSet<String> =
            std::collections::HashSet::new();
        let mut titles: Vec<&&str> = by_title.keys().collect();
        titles.sort();
        for title in titles {
            let group = &by_title[*title];
            if group.len() < 2 {
                continue;
            }
            let mut ordered: Vec<&&Memory> = group.iter().collect();
            ordered.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            let canonical = ordered[0];
            for duplicate in &ordered[1..] {
                actions.push(ConsolidationAction::MarkRedundant {
                    id: duplicate.id.clone(),
                    canonical: canonical.id.clone(),
                });
                redundant_ids.insert(duplicate.id.clone());
                stats.duplicates_collapsed += 1;
            }
        }

        // Strength decay archive
        let now = Utc::now();
        for memory in &active {
            if redundant_ids.contains(&memory.id) {
                continue;
            }
            let strength = memory.strength(now);
            if strength < self.config.archive_min_strength {
                actions.push(ConsolidationAction::Archive {
                    id: memory.id.clone(),
                    strength,
                });
                stats.archived += 1;
            }
        }

        // Orphans: ids present in exactly one index
        let mut vector_ids: std::collections::HashSet<String> =
            std::collections::HashSet::new();
        let mut offset = 0;
        loop {
            let page = self
                .vector
                .get_all(offset, SCAN_PAGE)
                .map_err(|e| EngineError::BackendUnavailable {
                    backend: Backend::Vector,
                    reason: e.to_string(),
                })?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for record in page {
                if self
                    .graph
                    .memory(&record.id)
                    .map_err(graph_unavailable)?
                    .is_none()
                {
                    actions.push(ConsolidationAction::ReconcileOrphan {
                        id: record.id.clone(),
                        side: Backend::Vector.to_string(),
                    });
                    stats.orphans_reconciled += 1;
                }
                vector_ids.insert(record.id);
            }
        }
        for memory in &active {
            if !vector_ids.contains(&memory.id) {
                actions.push(ConsolidationAction::ReconcileOrphan {
                    id: memory.id.clone(),
                    side: Backend::Graph.to_string(),
                });
                stats.orphans_reconciled += 1;
            }
        }

        Ok(actions)
    }

    fn apply(&self, action: &ConsolidationAction) -> Result<()> {
        match action {
            ConsolidationAction::MarkRedundant { id, canonical } => {
                let Some(mut memory) = self.graph.memory(id).map_err(graph_unavailable)?
                else {
                    return Ok(());
                };
                memory.status = Status::Redundant;
                self.graph
                    .upsert_memory(&memory)
                    .map_err(|e| graph_write(e.to_string()))?;
                let edge = Relationship {
                    from_id: id.clone(),
                    to_id: canonical.clone(),
                    rel_type: RelType::SimilarTo,
                    weight: None,
                    props: None,
                    created_at: Utc::now(),
                };
                self.graph
                    .upsert_edge(&edge)
                    .map_err(|e| graph_write(e.to_string()))?;
                self.sync_vector_metadata(&memory);
            }
            ConsolidationAction::Archive { id, .. } => {
                let Some(mut memory) = self.graph.memory(id).map_err(graph_unavailable)?
                else {
                    return Ok(());
                };
                memory.status = Status::Archived;
                self.graph
                    .upsert_memory(&memory)
                    .map_err(|e| graph_write(e.to_string()))?;
                self.sync_vector_metadata(&memory);
            }
            ConsolidationAction::ReconcileOrphan { id, side } => {
                self.reconcile_orphan(id, side)?;
            }
        }
        Ok(())
    }

    /// Repair a record that exists in only one index. The surviving side is
    /// authoritative; the missing half is rebuilt from it.
    fn reconcile_orphan(&self, id: &str, side: &str) -> Result<()> {
        if side == Backend::Vector.to_string() {
            // Vector record without a graph node: rebuild the node
            let Some(record) = self
                .vector
                .get(id)
                .map_err(|e| EngineError::BackendUnavailable {
                    backend: Backend::Vector,
                    reason: e.to_string(),
                })?
            else {
                return Ok(());
            };
            match memory_from_parts(id, &record.content, &record.metadata) {
                Ok(mut memory) => {
                    memory.status = Status::Active;
                    self.graph
                        .upsert_memory(&memory)
                        .map_err(|e| graph_write(e.to_string()))?;
                    self.sync_vector_metadata(&memory);
                }
                Err(e) => {
                    // Undecodable half-write: nothing authoritative to keep
                    warn!(id = %id, "dropping undecodable orphan record: {}", e);
                    let _ = self.vector.delete(id);
                }
            }
        } else {
            // Graph node without a vector record: re-embed and reinsert
            let Some(memory) = self.graph.memory(id).map_err(graph_unavailable)? else {
                return Ok(());
            };
            let embedding = self
                .embedder
                .embed(&memory.content)
                .map_err(|e| EngineError::EmbedderFailed(e.to_string()))?;
            let record = VectorRecord {
                id: memory.id.clone(),
                embedding,
                content: memory.content.clone(),
                metadata: memory_to_metadata(&memory),
            };
            self.vector
                .upsert(&record)
                .map_err(|e| EngineError::BackendWriteFailed {
                    backend: Backend::Vector,
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn sync_vector_metadata(&self, memory: &Memory) {
        let meta = memory_to_metadata(memory);
        if let Err(e) = self.vector.update_metadata(&memory.id, &meta) {
            warn!(id = %memory.id, "vector metadata sync failed: {}", e);
        }
    }
}

fn graph_unavailable(e: crate::graph::GraphStoreError) -> EngineError {
    EngineError::BackendUnavailable {
        backend: Backend::Graph,
        reason: e.to_string(),
    }
}

fn graph_write(reason: String) -> EngineError {
    EngineError::BackendWriteFailed {
        backend: Backend::Graph,
        reason,
    }
}

// ============================================================================
// TESTS
// ============================================================================
