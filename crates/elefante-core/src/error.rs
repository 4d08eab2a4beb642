//! Engine error taxonomy
//!
//! Backend errors are wrapped with component identity so callers can tell
//! which index failed. Retry policy lives with the callers: one retry with
//! 250 ms backoff for transient backend/embedder failures, never for
//! invalid input.

use crate::lock::LockHolder;

/// Which backend a wrapped error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The dense-vector index
    Vector,
    /// The labeled property graph
    Graph,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Vector => write!(f, "vector"),
            Backend::Graph => write!(f, "graph"),
        }
    }
}

/// Engine-level error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Caller-visible input problem; never retried
    #[error("invalid input: {field}: {reason}")]
    InvalidInput {
        /// Offending field name
        field: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// `layer` and `sublayer` disagree with the recognized pairing
    #[error("classification conflict: sublayer '{sublayer}' is not valid for layer '{layer}'")]
    ClassificationConflict {
        layer: String,
        sublayer: String,
    },

    /// A backend could not be reached; transient
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    /// A backend write failed after the call committed to mutating state
    #[error("{backend} backend write failed: {reason}")]
    BackendWriteFailed { backend: Backend, reason: String },

    /// The write lock could not be acquired within the deadline
    #[error("write lock unavailable (held by pid {} on {})", .holder.pid, .holder.host)]
    LockUnavailable {
        /// The current holder record, surfaced to callers
        holder: LockHolder,
    },

    /// The injected embedder failed; transient, retried once
    #[error("embedder failed: {0}")]
    EmbedderFailed(String),

    /// Cooperative cancellation (deadline expiry on the write path)
    #[error("operation cancelled before completion")]
    Cancelled,

    /// Internal invariant violation or unexpected storage state
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for an invalid-input error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Whether a single 250 ms-backoff retry is appropriate
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::BackendUnavailable { .. } | EngineError::EmbedderFailed(_)
        )
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Vector.to_string(), "vector");
        assert_eq!(Backend::Graph.to_string(), "graph");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::BackendUnavailable {
            backend: Backend::Graph,
            reason: "busy".into()
        }
        .is_transient());
        assert!(EngineError::EmbedderFailed("oom".into()).is_transient());
        assert!(!EngineError::invalid("content", "empty").is_transient());
        assert!(!EngineError::Cancelled.is_transient());
    }

    #[test]
    fn test_invalid_input_message() {
        let err = EngineError::invalid("query", "empty after trim");
        assert!(err.to_string().contains("query"));
        assert!(err.to_string().contains("empty after trim"));
    }
}
