//! Engine configuration
//!
//! All tunables recognized by the engine, with environment loading under the
//! `ELEFANTE_*` prefix. Defaults match the documented contract; anything the
//! environment does not override keeps its default.

use std::path::PathBuf;
use std::time::Duration;

/// Fixed embedding dimension unless overridden by configuration
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root path for persisted state (`vector/`, `graph/`, `write.lock`, `snapshots/`)
    pub data_dir: PathBuf,
    /// Embedding dimension; writes with a different dimension are rejected
    pub embedding_dim: usize,
    /// Age after which a lock holder is considered stale
    pub lock_stale_ms: u64,
    /// Default deadline for write-lock acquisition
    pub lock_acquire_timeout_ms: u64,
    /// Default `limit` for search when the caller omits it
    pub retrieval_default_limit: usize,
    /// Hard ceiling on `limit`
    pub retrieval_max_limit: usize,
    /// Default minimum cosine similarity for the semantic component
    pub min_similarity_default: f32,
    /// Half-life of conversation recency weighting
    pub conversation_half_life_minutes: f64,
    /// How many trailing messages of a session participate in scoring
    pub conversation_window: usize,
    /// Overall deadline for a retrieval call
    pub retrieval_deadline_ms: u64,
    /// Overall deadline for an ingestion call
    pub ingest_deadline_ms: u64,
    /// Memories whose temporal strength falls below this are archived by consolidation
    pub archive_min_strength: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            lock_stale_ms: 30_000,
            lock_acquire_timeout_ms: 5_000,
            retrieval_default_limit: 10,
            retrieval_max_limit: 500,
            min_similarity_default: 0.3,
            conversation_half_life_minutes: 60.0,
            conversation_window: 20,
            retrieval_deadline_ms: 10_000,
            ingest_deadline_ms: 30_000,
            archive_min_strength: 0.3,
        }
    }
}

/// Resolve `~/.elefante/data`, falling back to platform dirs when `$HOME`
/// cannot be determined.
fn default_data_dir() -> PathBuf {
    if let Some(base) = directories::BaseDirs::new() {
        return base.home_dir().join(".elefante").join("data");
    }
    if let Some(proj) = directories::ProjectDirs::from("dev", "elefante", "elefante") {
        return proj.data_dir().to_path_buf();
    }
    PathBuf::from(".elefante/data")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl EngineConfig {
    /// Build a configuration rooted at the given data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `ELEFANTE_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = std::env::var("ELEFANTE_DATA_DIR") {
            if !dir.is_empty() {
                cfg.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(v) = env_parse("ELEFANTE_EMBEDDING_DIM") {
            cfg.embedding_dim = v;
        }
        if let Some(v) = env_parse("ELEFANTE_LOCK_STALE_MS") {
            cfg.lock_stale_ms = v;
        }
        if let Some(v) = env_parse("ELEFANTE_LOCK_ACQUIRE_TIMEOUT_MS") {
            cfg.lock_acquire_timeout_ms = v;
        }
        if let Some(v) = env_parse("ELEFANTE_RETRIEVAL_DEFAULT_LIMIT") {
            cfg.retrieval_default_limit = v;
        }
        if let Some(v) = env_parse("ELEFANTE_RETRIEVAL_MAX_LIMIT") {
            cfg.retrieval_max_limit = v;
        }
        if let Some(v) = env_parse("ELEFANTE_MIN_SIMILARITY_DEFAULT") {
            cfg.min_similarity_default = v;
        }
        if let Some(v) = env_parse("ELEFANTE_CONVERSATION_HALF_LIFE_MINUTES") {
            cfg.conversation_half_life_minutes = v;
        }
        if let Some(v) = env_parse("ELEFANTE_CONVERSATION_WINDOW") {
            cfg.conversation_window = v;
        }
        if let Some(v) = env_parse("ELEFANTE_RETRIEVAL_DEADLINE_MS") {
            cfg.retrieval_deadline_ms = v;
        }
        if let Some(v) = env_parse("ELEFANTE_INGEST_DEADLINE_MS") {
            cfg.ingest_deadline_ms = v;
        }
        if let Some(v) = env_parse("ELEFANTE_ARCHIVE_MIN_STRENGTH") {
            cfg.archive_min_strength = v;
        }
        cfg
    }

    /// Clamp a caller-supplied limit into `[1, retrieval_max_limit]`,
    /// falling back to the default when absent.
    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.retrieval_default_limit)
            .clamp(1, self.retrieval_max_limit)
    }

    /// Stale threshold as a `Duration`
    pub fn lock_stale(&self) -> Duration {
        Duration::from_millis(self.lock_stale_ms)
    }

    /// Lock acquisition deadline as a `Duration`
    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }

    /// Path of the write-lock file
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("write.lock")
    }

    /// Path of the vector store directory
    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vector")
    }

    /// Path of the graph store directory
    pub fn graph_dir(&self) -> PathBuf {
        self.data_dir.join("graph")
    }

    /// Path of the snapshot export directory
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}
