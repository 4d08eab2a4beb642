//! Embedding layer
//!
//! The engine never talks to a model directly: it sees the [`Embedder`]
//! trait, injected at construction. Implementations must be pure and
//! deterministic per (model, text).
//!
//! Ships with:
//! - [`HashEmbedder`]: deterministic token-hash bag projection, used by the
//!   whole test suite and as the fallback when local inference is disabled.
//! - `LocalEmbedder` (feature `local-embeddings`): fastembed ONNX inference,
//!   384-dimensional, fully local.

#[cfg(feature = "local-embeddings")]
mod local;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding failure
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedderError {
    /// Model could not be initialized
    #[error("embedder initialization failed: {0}")]
    Init(String),
    /// Embedding generation failed
    #[error("embedding generation failed: {0}")]
    Failed(String),
    /// Input text is unusable (empty after trim)
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// CONTRACT
// ============================================================================

/// Text embedding contract: `embed(text) -> vec[D]`.
///
/// `dimension()` is fixed for the lifetime of the implementation; the engine
/// rejects writes whose vectors disagree with the configured dimension.
pub trait Embedder: Send + Sync {
    /// The fixed output dimension
    fn dimension(&self) -> usize;

    /// Embed one text. Must be deterministic for identical input.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

// ============================================================================
// VECTOR MATH & CODEC
// ============================================================================

/// Cosine similarity of two equal-length vectors, 0.0 for degenerate input
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Serialize an embedding as little-endian f32 bytes
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian f32 bytes; `None` when the length is not a
/// multiple of four
pub fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// HASH EMBEDDER
// ============================================================================

/// Deterministic bag-of-tokens projection.
///
/// Each lowercased alphanumeric token is FNV-1a hashed into a bucket; the
/// resulting count vector is L2-normalized. Texts sharing tokens land close
/// in cosine space, which is exactly what deterministic tests need.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbedderError::InvalidInput("empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in trimmed
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

// ============================================================================
// TESTS
// ============================================================================
