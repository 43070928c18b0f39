//! AI trait for the model-backed services.
//!
//! The AI trait abstracts the three capabilities the pipeline calls out to:
//! - Embedding the subject for semantic retrieval
//! - Relevance scoring of a node against the subject
//! - Structured item extraction from a content segment
//!
//! Prompt wording and model choice belong to the implementation; the
//! pipeline only relies on the contracts documented here.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{extraction::ExtractedItem, traversal::ScoringContext};

/// AI trait for model-backed operations.
///
/// Implementations wrap specific providers and classify their failures:
/// network hiccups as `Transient`, hard outages as `ServiceUnavailable`,
/// bad payloads as `MalformedResponse`. Per-call timeouts and retries are
/// applied by the pipeline, not by implementations.
#[async_trait]
pub trait AI: Send + Sync {
    /// Generate an embedding for text.
    ///
    /// Must be comparable with the embeddings held by the vector index.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Score how relevant a node is to the subject.
    ///
    /// Returns a float in [0,1]. Guidance bands for implementors:
    /// - 0.0–0.3: not relevant
    /// - 0.4–0.6: somewhat relevant
    /// - 0.7–0.9: highly relevant
    /// - 1.0: extremely relevant
    ///
    /// Out-of-range finite values are clamped by the caller.
    async fn score_relevance(&self, subject: &str, context: &ScoringContext) -> Result<f32>;

    /// Extract structured items about the subject from one content segment.
    ///
    /// `memory` is a digest of items already extracted from earlier
    /// segments of the same node; implementations should instruct the
    /// model not to restate them.
    async fn extract(
        &self,
        subject: &str,
        segment: &str,
        memory: Option<&str>,
    ) -> Result<Vec<ExtractedItem>>;
}
