//! Intelligent ingestion pipeline
//!
//! Deterministic write path: validate, canonicalize the SAQ title, probe for
//! duplicates (title first, content hash second), reinforce or create, embed,
//! and dual-write to both indices under the write lock. A failed dual-write
//! compensates by undoing the half that succeeded; if even that fails the
//! half-written record is marked `orphan` for the next consolidation pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::embeddings::Embedder;
use crate::error::{Backend, EngineError, Result};
use crate::graph::{serialize_props, GraphStore};
use crate::lock::LockManager;
use crate::memory::{
    content_hash, normalize_tags, Kind, Layer, Memory, RelType, Relationship, SaqTitle,
    Status, Sublayer, MAX_CONTENT_CHARS,
};
use crate::vector::{flatten_json, memory_to_metadata, VectorRecord, VectorStore};

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// Caller-supplied entity enrichment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityInput {
    pub name: String,
    pub entity_type: Option<String>,
    pub props: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Caller-supplied relationship enrichment.
///
/// `from_ref` / `to_ref` resolve in order: the literal `self` (the new
/// memory), the name of a supplied entity, then a raw node id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationshipInput {
    pub from_ref: String,
    pub to_ref: String,
    pub rel_type: String,
    pub weight: Option<f64>,
    pub props: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Input contract for `add_memory`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddMemoryInput {
    pub content: String,
    pub title: Option<String>,
    pub layer: Option<Layer>,
    pub sublayer: Option<Sublayer>,
    pub kind: Option<Kind>,
    pub importance: Option<u8>,
    pub confidence: Option<f32>,
    pub tags: Vec<String>,
    pub entities: Vec<EntityInput>,
    pub relationships: Vec<RelationshipInput>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub force_new: bool,
    /// Existing memory this one replaces
    pub supersedes: Option<String>,
    pub session_id: Option<String>,
    /// Deadline override, milliseconds
    pub deadline_ms: Option<u64>,
}

/// What `add_memory` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddAction {
    Created,
    Reinforced,
    Superseded,
}

/// Result of `add_memory`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub id: String,
    pub action: AddAction,
    pub warnings: Vec<String>,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The authoritative write path; one instance per engine
pub struct IngestionPipeline {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    lock: LockManager,
}

struct ValidatedInput {
    content: String,
    layer: Layer,
    sublayer: Sublayer,
    kind: Kind,
    importance: u8,
    confidence: f32,
    tags: Vec<String>,
    warnings: Vec<String>,
}

impl IngestionPipeline {
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

    /// Run the full pipeline. Blocking; the engine dispatches it off the
    /// async executor.
    pub fn add_memory(&self, input: AddMemoryInput) -> Result<AddOutcome> {
        let deadline = Instant::now()
            + Duration::from_millis(
                input.deadline_ms.unwrap_or(self.config.ingest_deadline_ms),
            );

        // ----- stage 1: parse & validate -----
        let mut validated = self.validate(&input)?;
        let hash = content_hash(&validated.content);

        // ----- stage 2: canonical SAQ title -----
        let entity_names: Vec<String> =
            input.entities.iter().map(|e| e.name.clone()).collect();
        let title = match input.title.as_deref().and_then(SaqTitle::sanitize) {
            Some(title) => title,
            None => {
                if input.title.is_some() {
                    validated
                        .warnings
                        .push("supplied title was unusable; derived from content".into());
                }
                let derived = SaqTitle::derive(
                    &validated.content,
                    validated.sublayer,
                    &validated.tags,
                    &entity_names,
                    &hash,
                );
                if derived == SaqTitle::fallback(validated.sublayer, &hash) {
                    validated.warnings.push("title derived from fallback".into());
                }
                derived
            }
        };

        // ----- stage 3: deduplication probe -----
        if !input.force_new {
            if let Some(existing) = self
                .graph
                .memory_by_title(title.as_str(), Status::Active)
                .map_err(unavailable_graph)?
            {
                return self.reinforce(existing, &validated, None);
            }
            if let Some(existing) = self
                .graph
                .memory_by_hash(&hash, Status::Active)
                .map_err(unavailable_graph)?
            {
                let alternate = (existing.title != title.as_str())
                    .then(|| title.as_str().to_string());
                return self.reinforce(existing, &validated, alternate);
            }
        }
        check_deadline(deadline)?;

        // ----- stage 4/5: defaults are in `validated`; embed -----
        let embedding = self.embed_with_retry(&validated.content)?;
        if embedding.len() != self.config.embedding_dim {
            return Err(EngineError::invalid(
                "embedding_dim",
                format!(
                    "embedder produced {} dimensions, configured {}",
                    embedding.len(),
                    self.config.embedding_dim
                ),
            ));
        }
        check_deadline(deadline)?;

        // ----- stage 6: dual-write under the write lock -----
        let now = Utc::now();
        let memory = Memory {
            id: Uuid::new_v4().to_string(),
            content: validated.content.clone(),
            title: title.into_string(),
            content_hash: hash,
            layer: validated.layer,
            sublayer: validated.sublayer,
            kind: validated.kind,
            importance: validated.importance,
            confidence: validated.confidence,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            decay_rate: 0.01,
            reinforcement_factor: 0.1,
            status: Status::Active,
            session_id: input.session_id.clone(),
            tags: validated.tags.clone(),
            supersedes: input.supersedes.clone(),
            superseded_by: None,
        };

        let guard = self
            .lock
            .acquire_with_timeout(self.config.lock_acquire_timeout())
            .map_err(|e| match e {
                crate::lock::LockError::Unavailable { holder } => {
                    EngineError::LockUnavailable { holder }
                }
                crate::lock::LockError::Io(io) => EngineError::Internal(io.to_string()),
            })?;

        let mut warnings = validated.warnings;
        let action = self.dual_write(&memory, embedding, &input, &mut warnings, deadline)?;
        drop(guard);

        debug!(id = %memory.id, title = %memory.title, "memory committed");
        Ok(AddOutcome {
            id: memory.id,
            action,
            warnings,
        })
    }

    fn validate(&self, input: &AddMemoryInput) -> Result<ValidatedInput> {
        let content = input.content.trim().to_string();
        if content.is_empty() {
            return Err(EngineError::invalid("content", "empty after trim"));
        }
        let chars = content.chars().count();
        if chars > MAX_CONTENT_CHARS {
            return Err(EngineError::invalid(
                "content",
                format!("{} characters exceeds the {} cap", chars, MAX_CONTENT_CHARS),
            ));
        }

        let mut warnings = Vec::new();
        let (layer, sublayer) = match (input.layer, input.sublayer) {
            (Some(layer), Some(sublayer)) => {
                if !layer.allows(sublayer) {
                    return Err(EngineError::ClassificationConflict {
                        layer: layer.as_str().to_string(),
                        sublayer: sublayer.as_str().to_string(),
                    });
                }
                (layer, sublayer)
            }
            (Some(layer), None) => (layer, layer.default_sublayer()),
            (None, Some(sublayer)) => {
                let layer = [Layer::SelfLayer, Layer::World, Layer::Intent]
                    .into_iter()
                    .find(|l| l.allows(sublayer))
                    .unwrap_or(Layer::World);
                (layer, sublayer)
            }
            (None, None) => {
                warnings.push("no classification provided; defaulted to world.fact".into());
                (Layer::World, Sublayer::Fact)
            }
        };

        if let Some(importance) = input.importance {
            if !(1..=10).contains(&importance) {
                return Err(EngineError::invalid(
                    "importance",
                    format!("{} outside 1..=10", importance),
                ));
            }
        }
        if let Some(confidence) = input.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(EngineError::invalid(
                    "confidence",
                    format!("{} outside 0.0..=1.0", confidence),
                ));
            }
        }

        Ok(ValidatedInput {
            content,
            layer,
            sublayer,
            kind: input.kind.unwrap_or(Kind::Note),
            importance: input.importance.unwrap_or(5),
            confidence: input.confidence.unwrap_or(0.7),
            tags: normalize_tags(input.tags.iter().map(String::as_str)),
            warnings,
        })
    }

    /// Reinforcement path: bump the existing record instead of creating a
    /// duplicate. Bounded to one access-count increment per call.
    fn reinforce(
        &self,
        mut existing: Memory,
        incoming: &ValidatedInput,
        alternate_title: Option<String>,
    ) -> Result<AddOutcome> {
        let guard = self
            .lock
            .acquire_with_timeout(self.config.lock_acquire_timeout())
            .map_err(|e| match e {
                crate::lock::LockError::Unavailable { holder } => {
                    EngineError::LockUnavailable { holder }
                }
                crate::lock::LockError::Io(io) => EngineError::Internal(io.to_string()),
            })?;

        existing.access_count += 1;
        existing.last_accessed_at = Utc::now();
        existing.importance = existing.importance.max(incoming.importance);
        let merged = normalize_tags(
            existing
                .tags
                .iter()
                .chain(incoming.tags.iter())
                .map(String::as_str),
        );
        existing.tags = merged;

        self.graph
            .upsert_memory(&existing)
            .map_err(|e| write_failed(Backend::Graph, e.to_string()))?;
        let meta = memory_to_metadata(&existing);
        self.vector
            .update_metadata(&existing.id, &meta)
            .map_err(|e| write_failed(Backend::Vector, e.to_string()))?;

        let mut warnings = incoming.warnings.clone();
        if let Some(alternate) = alternate_title {
            // Same content arrived under a different name. If that name
            // already labels another memory, link the pair; otherwise just
            // record the alias observation.
            match self
                .graph
                .memory_by_title(&alternate, Status::Active)
                .map_err(unavailable_graph)?
            {
                Some(other) if other.id != existing.id => {
                    let edge = Relationship {
                        from_id: other.id.clone(),
                        to_id: existing.id.clone(),
                        rel_type: RelType::SimilarTo,
                        weight: None,
                        props: None,
                        created_at: Utc::now(),
                    };
                    self.graph
                        .upsert_edge(&edge)
                        .map_err(|e| write_failed(Backend::Graph, e.to_string()))?;
                }
                _ => {
                    warnings.push(format!(
                        "content matched existing '{}' under alternate title '{}'",
                        existing.title, alternate
                    ));
                }
            }
        }

        drop(guard);
        debug!(id = %existing.id, "memory reinforced");
        Ok(AddOutcome {
            id: existing.id,
            action: AddAction::Reinforced,
            warnings,
        })
    }

    fn embed_with_retry(&self, content: &str) -> Result<Vec<f32>> {
        match self.embedder.embed(content) {
            Ok(vector) => Ok(vector),
            Err(first) => {
                std::thread::sleep(RETRY_BACKOFF);
                self.embedder
                    .embed(content)
                    .map_err(|_| EngineError::EmbedderFailed(first.to_string()))
            }
        }
    }

    /// Stage 6 proper: vector insert, graph node, enrichment edges.
    /// Any failure compensates the half that already succeeded.
    fn dual_write(
        &self,
        memory: &Memory,
        embedding: Vec<f32>,
        input: &AddMemoryInput,
        warnings: &mut Vec<String>,
        deadline: Instant,
    ) -> Result<AddAction> {
        // (a) vector record, with caller metadata flattened in
        let mut metadata = memory_to_metadata(memory);
        if let Some(extra) = &input.metadata {
            for (key, value) in extra {
                if metadata.contains_key(key) {
                    warnings.push(format!("metadata key '{}' shadows a core field; skipped", key));
                    continue;
                }
                match flatten_json(key, value) {
                    Ok(flat) => {
                        metadata.insert(key.clone(), flat);
                    }
                    Err(_) => {
                        warnings.push(format!(
                            "metadata key '{}' is not a flat scalar; skipped",
                            key
                        ));
                    }
                }
            }
        }
        let record = VectorRecord {
            id: memory.id.clone(),
            embedding,
            content: memory.content.clone(),
            metadata,
        };
        self.vector
            .upsert(&record)
            .map_err(|e| write_failed(Backend::Vector, e.to_string()))?;

        // (b, c) graph side; on failure undo the vector insert
        match self.write_graph_side(memory, input, warnings, deadline) {
            Ok(action) => Ok(action),
            Err(e) => {
                self.compensate_vector(&memory.id);
                Err(e)
            }
        }
    }

    fn write_graph_side(
        &self,
        memory: &Memory,
        input: &AddMemoryInput,
        warnings: &mut Vec<String>,
        deadline: Instant,
    ) -> Result<AddAction> {
        self.graph
            .upsert_memory(memory)
            .map_err(|e| write_failed(Backend::Graph, e.to_string()))?;

        let undo_graph = |e: EngineError| -> EngineError {
            if let Err(undo) = self.graph.delete_memory(&memory.id) {
                warn!(id = %memory.id, "graph compensation failed: {}", undo);
            }
            e
        };

        check_deadline(deadline).map_err(undo_graph)?;

        // Session attachment
        if let Some(session_id) = &input.session_id {
            self.graph
                .upsert_session(session_id, memory.created_at)
                .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?;
            let part_of = Relationship {
                from_id: memory.id.clone(),
                to_id: session_id.clone(),
                rel_type: RelType::PartOf,
                weight: None,
                props: None,
                created_at: memory.created_at,
            };
            self.graph
                .upsert_edge(&part_of)
                .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?;
        }

        // Caller-supplied entities, each linked with a mentions edge
        let mut entity_ids: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        for entity in &input.entities {
            let name = entity.name.trim();
            if name.is_empty() {
                warnings.push("entity not linked: empty name".into());
                continue;
            }
            let Some(entity_type) = entity.entity_type.as_deref() else {
                warnings.push(format!("entity not linked: missing type for '{}'", name));
                continue;
            };
            let props = match &entity.props {
                Some(map) => Some(
                    serialize_props(map)
                        .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?,
                ),
                None => None,
            };
            let entity_id = self
                .graph
                .upsert_entity(name, entity_type, props.as_deref())
                .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?;
            let mentions = Relationship {
                from_id: memory.id.clone(),
                to_id: entity_id.clone(),
                rel_type: RelType::Mentions,
                weight: None,
                props: None,
                created_at: memory.created_at,
            };
            self.graph
                .upsert_edge(&mentions)
                .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?;
            entity_ids.insert(name.to_string(), entity_id);
        }

        // Caller-supplied relationships
        for rel in &input.relationships {
            let Some(rel_type) = RelType::parse(&rel.rel_type) else {
                warnings.push(format!("relationship skipped: unknown type '{}'", rel.rel_type));
                continue;
            };
            let resolve = |reference: &str| -> Option<String> {
                if reference.eq_ignore_ascii_case("self") {
                    return Some(memory.id.clone());
                }
                if let Some(id) = entity_ids.get(reference) {
                    return Some(id.clone());
                }
                Some(reference.to_string())
            };
            let (Some(from_id), Some(to_id)) = (resolve(&rel.from_ref), resolve(&rel.to_ref))
            else {
                continue;
            };
            let props = match &rel.props {
                Some(map) => Some(
                    serialize_props(map)
                        .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?,
                ),
                None => None,
            };
            let edge = Relationship {
                from_id,
                to_id,
                rel_type,
                weight: rel.weight,
                props,
                created_at: memory.created_at,
            };
            if let Err(e) = self.graph.upsert_edge(&edge) {
                // Unresolvable endpoints are a caller mistake, not a write
                // failure worth aborting the commit for
                if matches!(e, crate::graph::GraphStoreError::EndpointMissing { .. }) {
                    warnings.push(format!("relationship skipped: {}", e));
                } else {
                    return Err(undo_graph(write_failed(Backend::Graph, e.to_string())));
                }
            }
        }

        // Supersede transition
        let mut action = AddAction::Created;
        if let Some(old_id) = &input.supersedes {
            match self
                .graph
                .memory(old_id)
                .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?
            {
                Some(mut old) => {
                    old.status = Status::Superseded;
                    old.superseded_by = Some(memory.id.clone());
                    self.graph
                        .upsert_memory(&old)
                        .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?;
                    let meta = memory_to_metadata(&old);
                    if let Err(e) = self.vector.update_metadata(old_id, &meta) {
                        warn!(id = %old_id, "vector-side supersede update failed: {}", e);
                    }
                    let edge = Relationship {
                        from_id: memory.id.clone(),
                        to_id: old_id.clone(),
                        rel_type: RelType::Supersedes,
                        weight: None,
                        props: None,
                        created_at: memory.created_at,
                    };
                    self.graph
                        .upsert_edge(&edge)
                        .map_err(|e| undo_graph(write_failed(Backend::Graph, e.to_string())))?;
                    action = AddAction::Superseded;
                }
                None => {
                    warnings.push(format!(
                        "supersedes target '{}' not found; created without transition",
                        old_id
                    ));
                }
            }
        }

        Ok(action)
    }

    /// Undo a committed vector insert; mark the record orphan when the undo
    /// itself fails so consolidation can reconcile it later.
    fn compensate_vector(&self, id: &str) {
        match self.vector.delete(id) {
            Ok(_) => {}
            Err(e) => {
                warn!(id = %id, "vector compensation failed, marking orphan: {}", e);
                if let Ok(Some(record)) = self.vector.get(id) {
                    let mut meta = record.metadata;
                    meta.insert(
                        "memory_status".into(),
                        crate::vector::MetaValue::Str(Status::Orphan.as_str().into()),
                    );
                    let _ = self.vector.update_metadata(id, &meta);
                }
            }
        }
    }
}

fn check_deadline(deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

fn write_failed(backend: Backend, reason: String) -> EngineError {
    EngineError::BackendWriteFailed { backend, reason }
}

fn unavailable_graph(e: crate::graph::GraphStoreError) -> EngineError {
    EngineError::BackendUnavailable {
        backend: Backend::Graph,
        reason: e.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
