//! Local embedding inference
//!
//! fastembed (ONNX) with the all-MiniLM-L6-v2 model: 384 dimensions,
//! fully local, no external API. The model is initialized once per process
//! and shared behind a mutex (the fastembed handle is not Sync).

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{Embedder, EmbedderError};

/// Output dimension of all-MiniLM-L6-v2
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 384;

/// Longest text passed to the model; longer inputs are truncated
const MAX_TEXT_CHARS: usize = 8192;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Cache directory for model files.
/// `ELEFANTE_MODEL_CACHE` wins; then the platform cache dir.
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("ELEFANTE_MODEL_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj) = directories::ProjectDirs::from("dev", "elefante", "elefante") {
        return proj.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbedderError> {
    let entry = MODEL.get_or_init(|| {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("failed to create model cache dir {:?}: {}", dir, e);
        }
        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false)
            .with_cache_dir(dir);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize all-MiniLM-L6-v2: {}", e))
    });

    match entry {
        Ok(mutex) => mutex
            .lock()
            .map_err(|e| EmbedderError::Init(format!("model lock poisoned: {}", e))),
        Err(e) => Err(EmbedderError::Init(e.clone())),
    }
}

/// Local fastembed-backed embedder
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEmbedder;

impl LocalEmbedder {
    pub fn new() -> Self {
        Self
    }

    /// Force model initialization early so first-use latency (and any
    /// download failure) surfaces at startup instead of first ingest.
    pub fn warm_up(&self) -> Result<(), EmbedderError> {
        model().map(|_| ())
    }
}

impl Embedder for LocalEmbedder {
    fn dimension(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbedderError::InvalidInput("empty text".to_string()));
        }
        let input: String = trimmed.chars().take(MAX_TEXT_CHARS).collect();

        let mut guard = model()?;
        let mut batch = guard
            .embed(vec![input], None)
            .map_err(|e| EmbedderError::Failed(e.to_string()))?;
        batch
            .pop()
            .ok_or_else(|| EmbedderError::Failed("model returned no vectors".to_string()))
    }
}
