//! Typed errors for the section extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Every failure is classified
//! so callers can tell a retryable service hiccup from a fatal store outage.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// External black-box service invoked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Subject / text embedding
    Embedding,
    /// Relevance scoring of a node against the subject
    Scoring,
    /// Structured item extraction from a content segment
    Extraction,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedding => f.write_str("embedding"),
            Self::Scoring => f.write_str("scoring"),
            Self::Extraction => f.write_str("extraction"),
        }
    }
}

/// Read-only store the pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    Graph,
    Vector,
    Content,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph => f.write_str("graph store"),
            Self::Vector => f.write_str("vector index"),
            Self::Content => f.write_str("content reader"),
        }
    }
}

/// Errors that can occur during retrieval, traversal and extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Network error or similar; safe to retry
    #[error("{service} service transient failure: {message}")]
    Transient { service: Service, message: String },

    /// A single service call exceeded its timeout
    #[error("{service} call timed out after {after:?}")]
    Timeout { service: Service, after: Duration },

    /// Score outside [0,1] that cannot be coerced, unparseable payload, ...
    #[error("malformed {service} response: {detail}")]
    MalformedResponse { service: Service, detail: String },

    /// Service is down; retrying will not help
    #[error("{service} service unavailable: {message}")]
    ServiceUnavailable { service: Service, message: String },

    /// Graph store, vector index or content reader unreachable
    #[error("{store} unavailable: {message}")]
    StoreUnavailable { store: Store, message: String },

    /// Traversal aborted because the scoring service stopped answering
    #[error("scoring service unavailable after {failures} consecutive failed calls")]
    ScoringUnavailable { failures: usize },

    /// Node id not present in the graph store
    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid subject provided
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl ExtractionError {
    /// Shorthand for a transient failure.
    pub fn transient(service: Service, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            message: message.into(),
        }
    }

    /// Shorthand for a malformed response.
    pub fn malformed(service: Service, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service,
            detail: detail.into(),
        }
    }

    /// Shorthand for an unavailable service.
    pub fn unavailable(service: Service, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            service,
            message: message.into(),
        }
    }

    /// Shorthand for an unreachable store.
    pub fn store(store: Store, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            store,
            message: message.into(),
        }
    }

    /// Whether the retry policy should attempt the call again.
    ///
    /// Timeouts and malformed responses count as transient failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Timeout { .. } | Self::MalformedResponse { .. }
        )
    }

    /// Whether this error means a whole service or store is gone.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. }
                | Self::StoreUnavailable { .. }
                | Self::ScoringUnavailable { .. }
        )
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ExtractionError::transient(Service::Scoring, "reset").is_retryable());
        assert!(ExtractionError::Timeout {
            service: Service::Extraction,
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ExtractionError::malformed(Service::Scoring, "NaN").is_retryable());

        assert!(!ExtractionError::unavailable(Service::Scoring, "down").is_retryable());
        assert!(!ExtractionError::Cancelled.is_retryable());
        assert!(ExtractionError::store(Store::Graph, "refused").is_unavailable());
    }

    #[test]
    fn test_display_names_service() {
        let err = ExtractionError::transient(Service::Embedding, "connection reset");
        assert_eq!(
            err.to_string(),
            "embedding service transient failure: connection reset"
        );
    }
}
