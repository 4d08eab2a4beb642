//! Hybrid retrieval orchestrator
//!
//! Translates a query plus filters and session context into a ranked result
//! list. The three backend dispatches run concurrently on blocking tasks and
//! are joined under the call's deadline; a degraded source marks the
//! response partial instead of failing the call (except when the forced mode
//! hard-requires that backend). Access bumps for returned memories are
//! applied in one batch after the response is computed, without the
//! application write lock.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::embeddings::Embedder;
use crate::error::{Backend, EngineError, Result};
use crate::graph::{GraphStore, LabelMatch, NodeTable};
use crate::memory::{Memory, MemoryFilter};
use crate::search::{
    classify::{classify_query, SearchMode},
    fusion, SearchHit, SearchOptions, SearchResponse, SubScores,
};
use crate::session::{tokens, ConversationCandidate, ConversationContext};
use crate::vector::{memory_from_parts, memory_to_metadata, VectorStore};

/// Hard cap on the per-source fetch budget
const MAX_SOURCE_FETCH: usize = 50;
/// How many query tokens participate in graph label lookup
const MAX_LABEL_NEEDLES: usize = 6;
/// Cap on session-membership candidates fed to conversation scoring
const MAX_SESSION_CANDIDATES: usize = 200;
/// Query-embedding cache capacity
const QUERY_CACHE_CAPACITY: usize = 128;
/// Backoff before the single transient-failure retry
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// The retrieval orchestrator; long-lived, shared behind the engine
pub struct Orchestrator {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    conversation: ConversationContext,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    /// Ids whose access bump could not be applied; flushed by close()
    /// or the next consolidation pass
    pending_bumps: Mutex<Vec<String>>,
}

/// Raw output of one source dispatch
type RawScores = HashMap<String, f64>;

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        let conversation = ConversationContext::new(
            config.conversation_half_life_minutes,
            config.conversation_window,
        );
        let cache_capacity =
            NonZeroUsize::new(QUERY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            embedder,
            vector,
            graph,
            conversation,
            query_cache: Mutex::new(LruCache::new(cache_capacity)),
            pending_bumps: Mutex::new(Vec::new()),
        }
    }

    /// Run a hybrid retrieval. See the module docs for the full pipeline.
    pub async fn search(
        &self,
        query: &str,
        filter: &MemoryFilter,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let trimmed = query.trim().to_string();
        if trimmed.is_empty() {
            return Err(EngineError::invalid("query", "empty after trim"));
        }

        let limit = self.config.clamp_limit(options.limit);
        let fetch_k = (2 * limit).min(MAX_SOURCE_FETCH);
        let min_similarity = options
            .min_similarity
            .unwrap_or(self.config.min_similarity_default)
            .clamp(0.0, 1.0);

        let include_conversation =
            options.include_conversation() && options.session_id.is_some();
        let plan = classify_query(&trimmed, options.mode, include_conversation);
        debug!(
            vector = plan.vector_weight,
            graph = plan.graph_weight,
            conversation = plan.conversation_weight,
            "query plan"
        );

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(
                options
                    .deadline_ms
                    .unwrap_or(self.config.retrieval_deadline_ms),
            );
        let mut partial = false;

        // ----- embed the query (vector source only) -----
        let query_embedding = if plan.vector_weight > 0.0 {
            match self.embed_query(trimmed.clone(), deadline).await {
                Ok(vector) => Some(vector),
                Err(e) if plan.mode == SearchMode::Semantic => return Err(e),
                Err(e) => {
                    warn!("vector source degraded (embedding): {}", e);
                    partial = true;
                    None
                }
            }
        } else {
            None
        };

        // ----- dispatch in parallel -----
        let vector_task = query_embedding.map(|embedding| {
            let store = Arc::clone(&self.vector);
            let filter = filter.clone();
            spawn_with_retry(move || {
                let hits = store
                    .query(&embedding, fetch_k, Some(&filter))
                    .map_err(|e| EngineError::BackendUnavailable {
                        backend: Backend::Vector,
                        reason: e.to_string(),
                    })?;
                let mut scores = RawScores::new();
                let mut memories = HashMap::new();
                for hit in hits {
                    if hit.similarity < min_similarity {
                        continue;
                    }
                    if let Ok(memory) = memory_from_parts(&hit.id, &hit.content, &hit.metadata)
                    {
                        scores.insert(hit.id.clone(), f64::from(hit.similarity));
                        memories.insert(hit.id, memory);
                    }
                }
                Ok((scores, memories))
            })
        });

        let graph_task = (plan.graph_weight > 0.0).then(|| {
            let store = Arc::clone(&self.graph);
            let query = trimmed.clone();
            let filter = filter.clone();
            spawn_with_retry(move || graph_lookup(&store, &query, &filter, fetch_k))
        });

        let conversation_task = (plan.conversation_weight > 0.0)
            .then(|| options.session_id.clone())
            .flatten()
            .map(|session_id| {
                let store = Arc::clone(&self.graph);
                let query = trimmed.clone();
                let filter = filter.clone();
                let scorer = self.conversation.clone();
                spawn_with_retry(move || {
                    conversation_lookup(&store, &scorer, &session_id, &query, &filter)
                })
            });

        // ----- join under the deadline -----
        let vector_result = join_source(vector_task, deadline).await;
        let graph_result = join_source(graph_task, deadline).await;
        let conversation_result = join_source(conversation_task, deadline).await;

        let (vector_raw, vector_memories) = match vector_result {
            SourceOutcome::Ok(output) => output,
            SourceOutcome::Absent => Default::default(),
            SourceOutcome::Failed(e) => {
                if plan.mode == SearchMode::Semantic {
                    return Err(e);
                }
                warn!("vector source degraded: {}", e);
                partial = true;
                Default::default()
            }
        };
        let (graph_raw, graph_memories) = match graph_result {
            SourceOutcome::Ok(output) => output,
            SourceOutcome::Absent => Default::default(),
            SourceOutcome::Failed(e) => {
                if plan.mode == SearchMode::Structured {
                    return Err(e);
                }
                warn!("graph source degraded: {}", e);
                partial = true;
                Default::default()
            }
        };
        let (conversation_raw, conversation_memories) = match conversation_result {
            SourceOutcome::Ok(output) => output,
            SourceOutcome::Absent => Default::default(),
            SourceOutcome::Failed(e) => {
                warn!("conversation source degraded: {}", e);
                partial = true;
                Default::default()
            }
        };

        // ----- normalize, fuse, rank -----
        let vector_norm = fusion::min_max_normalize(&vector_raw);
        let graph_norm = fusion::min_max_normalize(&graph_raw);
        let conversation_norm = fusion::min_max_normalize(&conversation_raw);

        let mut pool: HashMap<String, Memory> = HashMap::new();
        for (id, memory) in vector_memories {
            pool.insert(id, memory);
        }
        for (id, memory) in graph_memories.into_iter().chain(conversation_memories) {
            pool.entry(id).or_insert(memory);
        }

        let now = Utc::now();
        let weights = (
            plan.vector_weight,
            plan.graph_weight,
            plan.conversation_weight,
        );
        let mut hits: Vec<SearchHit> = Vec::with_capacity(pool.len());
        for (id, memory) in pool {
            let sub = SubScores {
                vector: vector_norm.get(&id).copied(),
                graph: graph_norm.get(&id).copied(),
                conversation: conversation_norm.get(&id).copied(),
                strength: memory.strength(now),
            };
            let score = fusion::fuse(&sub, weights);
            hits.push(SearchHit {
                source: sub.source(),
                score,
                sub_scores: sub,
                memory,
            });
        }

        fusion::sort_ranked(&mut hits);
        let mut hits = fusion::dedup_by_title(hits);
        hits.truncate(limit);

        // ----- batched access bumps, after the response is computed -----
        let bump_ids: Vec<String> = hits.iter().map(|h| h.memory.id.clone()).collect();
        self.apply_access_bumps_blocking(bump_ids).await;

        Ok(SearchResponse {
            results: hits,
            partial,
            plan,
        })
    }

    /// Embed a query with the LRU cache and one transient retry
    async fn embed_query(
        &self,
        text: String,
        deadline: tokio::time::Instant,
    ) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(&text) {
                return Ok(cached.clone());
            }
        }

        let embedder = Arc::clone(&self.embedder);
        let key = text.clone();
        let task = tokio::task::spawn_blocking(move || {
            match embedder.embed(&key) {
                Ok(vector) => Ok(vector),
                Err(first) => {
                    std::thread::sleep(RETRY_BACKOFF);
                    embedder
                        .embed(&key)
                        .map_err(|_| EngineError::EmbedderFailed(first.to_string()))
                }
            }
        });

        let vector = tokio::time::timeout_at(deadline, task)
            .await
            .map_err(|_| EngineError::Cancelled)?
            .map_err(|e| EngineError::Internal(format!("embed task: {}", e)))??;

        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text, vector.clone());
        }
        Ok(vector)
    }

    /// Apply queued and fresh access bumps. Failures re-queue.
    async fn apply_access_bumps_blocking(&self, mut ids: Vec<String>) {
        if let Ok(mut pending) = self.pending_bumps.lock() {
            ids.append(&mut pending);
        }
        if ids.is_empty() {
            return;
        }

        let graph = Arc::clone(&self.graph);
        let vector = Arc::clone(&self.vector);
        let result = tokio::task::spawn_blocking(move || {
            let mut failed = Vec::new();
            let now = Utc::now();
            for id in ids {
                match graph.memory(&id) {
                    Ok(Some(mut memory)) => {
                        memory.access_count += 1;
                        memory.last_accessed_at = now;
                        if let Err(e) = graph.upsert_memory(&memory) {
                            warn!(id = %id, "access bump deferred: {}", e);
                            failed.push(id);
                            continue;
                        }
                        let meta = memory_to_metadata(&memory);
                        if let Err(e) = vector.update_metadata(&id, &meta) {
                            warn!(id = %id, "vector-side access bump failed: {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(id = %id, "access bump deferred: {}", e);
                        failed.push(id);
                    }
                }
            }
            failed
        })
        .await;

        match result {
            Ok(failed) if !failed.is_empty() => {
                if let Ok(mut pending) = self.pending_bumps.lock() {
                    pending.extend(failed);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("access bump task failed: {}", e),
        }
    }

    /// Flush any deferred access bumps (called by close/consolidate)
    pub async fn flush_pending_bumps(&self) {
        self.apply_access_bumps_blocking(Vec::new()).await;
    }

    /// Number of bumps still waiting to be applied
    pub fn pending_bump_count(&self) -> usize {
        self.pending_bumps.lock().map(|p| p.len()).unwrap_or(0)
    }
}

// ============================================================================
// SOURCE DISPATCH HELPERS
// ============================================================================

type SourceOutput = (RawScores, HashMap<String, Memory>);

enum SourceOutcome {
    Ok(SourceOutput),
    Failed(EngineError),
    Absent,
}

/// Spawn a blocking source dispatch with one transient retry
fn spawn_with_retry<F>(work: F) -> JoinHandle<Result<SourceOutput>>
where
    F: Fn() -> Result<SourceOutput> + Send + 'static,
{
    tokio::task::spawn_blocking(move || match work() {
        Ok(output) => Ok(output),
        Err(e) if e.is_transient() => {
            std::thread::sleep(RETRY_BACKOFF);
            work()
        }
        Err(e) => Err(e),
    })
}

/// Await a source under the shared deadline; a timed-out source counts as
/// failed (its in-flight work is abandoned).
async fn join_source(
    task: Option<JoinHandle<Result<SourceOutput>>>,
    deadline: tokio::time::Instant,
) -> SourceOutcome {
    let Some(handle) = task else {
        return SourceOutcome::Absent;
    };
    match tokio::time::timeout_at(deadline, handle).await {
        Err(_) => SourceOutcome::Failed(EngineError::Cancelled),
        Ok(Err(join_error)) => {
            SourceOutcome::Failed(EngineError::Internal(join_error.to_string()))
        }
        Ok(Ok(Err(e))) => SourceOutcome::Failed(e),
        Ok(Ok(Ok(output))) => SourceOutcome::Ok(output),
    }
}

fn graph_err(e: crate::graph::GraphStoreError) -> EngineError {
    EngineError::BackendUnavailable {
        backend: Backend::Graph,
        reason: e.to_string(),
    }
}

/// Structured graph lookup: exact/prefix label matches on entity names and
/// memory titles, expanded one hop through the relationship tables. The raw
/// score counts label matches and edge weights; filter constraints bound the
/// candidate set.
fn graph_lookup(
    store: &Arc<dyn GraphStore>,
    query: &str,
    filter: &MemoryFilter,
    k: usize,
) -> Result<SourceOutput> {
    let mut needles: Vec<String> = vec![query.to_string()];
    let mut query_tokens: Vec<String> = tokens(query).into_iter().collect();
    query_tokens.sort();
    query_tokens.truncate(MAX_LABEL_NEEDLES);
    needles.extend(query_tokens);

    let mut scores = RawScores::new();
    let mut direct_memory_matches: Vec<String> = Vec::new();

    for needle in &needles {
        let matches: Vec<LabelMatch> =
            store.find_by_label(needle, k).map_err(graph_err)?;
        for label_match in matches {
            let base = if label_match.exact { 2.0 } else { 1.0 };
            match label_match.table {
                NodeTable::Memory => {
                    *scores.entry(label_match.id.clone()).or_default() += base;
                    direct_memory_matches.push(label_match.id);
                }
                NodeTable::Entity => {
                    let neighbors = store
                        .neighborhood(&label_match.id, 1, k * 2)
                        .map_err(graph_err)?;
                    for neighbor in neighbors {
                        if neighbor.table == NodeTable::Memory {
                            *scores.entry(neighbor.id).or_default() +=
                                base * 0.5 + 0.25 * neighbor.weight;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // One-hop expansion around directly matched memories
    direct_memory_matches.sort();
    direct_memory_matches.dedup();
    for id in &direct_memory_matches {
        let neighbors = store.neighborhood(id, 1, k).map_err(graph_err)?;
        for neighbor in neighbors {
            if neighbor.table == NodeTable::Memory {
                *scores.entry(neighbor.id).or_default() += 0.25 * neighbor.weight;
            }
        }
    }

    // Hydrate and bound by the filter
    let mut memories = HashMap::new();
    let mut candidate_ids: Vec<String> = scores.keys().cloned().collect();
    candidate_ids.sort();
    for id in candidate_ids {
        match store.memory(&id).map_err(graph_err)? {
            Some(memory) if filter.matches(&memory) => {
                memories.insert(id, memory);
            }
            _ => {
                scores.remove(&id);
            }
        }
    }

    // Keep only the top-k candidates, deterministically
    if scores.len() > k {
        let mut ranked: Vec<(String, f64)> =
            scores.iter().map(|(id, s)| (id.clone(), *s)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        let keep: std::collections::HashSet<String> =
            ranked.into_iter().map(|(id, _)| id).collect();
        scores.retain(|id, _| keep.contains(id));
        memories.retain(|id, _| keep.contains(id));
    }

    Ok((scores, memories))
}

/// Conversation lookup: score session-attached and message-referenced
/// memories against the trailing message window.
fn conversation_lookup(
    store: &Arc<dyn GraphStore>,
    scorer: &ConversationContext,
    session_id: &str,
    query: &str,
    filter: &MemoryFilter,
) -> Result<SourceOutput> {
    let messages = store
        .recent_messages(session_id, scorer.window())
        .map_err(graph_err)?;
    if messages.is_empty() {
        return Ok(Default::default());
    }

    let mut candidate_ids = store
        .session_memory_ids(session_id)
        .map_err(graph_err)?;
    candidate_ids.truncate(MAX_SESSION_CANDIDATES);

    // Ids referenced verbatim inside the message window
    for message in &messages {
        for token in message.text.split_whitespace() {
            if token.len() == 36 && token.chars().filter(|c| *c == '-').count() == 4 {
                candidate_ids.push(token.to_string());
            }
        }
    }
    candidate_ids.sort();
    candidate_ids.dedup();

    let mut memories = HashMap::new();
    let mut candidates = Vec::new();
    for id in candidate_ids {
        if let Some(memory) = store.memory(&id).map_err(graph_err)? {
            if filter.matches(&memory) {
                candidates.push(ConversationCandidate {
                    id: id.clone(),
                    title: memory.title.clone(),
                });
                memories.insert(id, memory);
            }
        }
    }

    let scores = scorer.score(query, &messages, &candidates, Utc::now());
    memories.retain(|id, _| scores.contains_key(id));
    Ok((scores, memories))
}
