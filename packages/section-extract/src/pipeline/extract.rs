//! Memory-aware extraction of one node's content.
//!
//! Content that fits the single-call budget is extracted in one call.
//! Larger content is segmented and processed strictly in order, each call
//! after the first carrying a digest of everything extracted so far.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExtractionError, Result, Service};
use crate::pipeline::dedup::dedup_items;
use crate::pipeline::memory::ExtractionMemory;
use crate::pipeline::retry::call_with_retry;
use crate::pipeline::segment::segment;
use crate::traits::ai::AI;
use crate::types::config::{ExtractionConfig, RetryPolicy};
use crate::types::extraction::{ExtractionStatus, NodeExtraction};
use crate::types::segment::{Segment, SegmentKind};

/// Runs extraction passes against an AI service.
pub struct Extractor<'a, A: ?Sized> {
    ai: &'a A,
    config: &'a ExtractionConfig,
    policy: &'a RetryPolicy,
}

impl<'a, A: AI + ?Sized> Extractor<'a, A> {
    /// Create an extractor.
    pub fn new(ai: &'a A, config: &'a ExtractionConfig, policy: &'a RetryPolicy) -> Self {
        Self { ai, config, policy }
    }

    /// Split content into the segments one pass will process.
    pub fn plan(&self, content: &str) -> Vec<Segment> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let tokens = self.config.segment.estimate_tokens(content);
        if tokens <= self.config.single_call_budget {
            return vec![Segment {
                index: 0,
                text: content.to_string(),
                tokens,
                kind: SegmentKind::Mixed,
                start_line: 1,
                forced_split: false,
            }];
        }
        segment(content, &self.config.segment)
    }

    /// Extract items about `subject` from one node's content.
    ///
    /// A segment whose call fails is recorded in `failed_segments` and
    /// leaves the memory untouched; later segments still run. Cancellation
    /// stops the pass and marks it `Cancelled`, keeping the items so far.
    pub async fn extract_node(
        &self,
        subject: &str,
        node_id: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> NodeExtraction {
        let segments = self.plan(content);
        let mut result = NodeExtraction::new(node_id, segments.len());
        let mut memory = ExtractionMemory::from_config(self.config);

        debug!(
            node_id = %node_id,
            segments = segments.len(),
            tokens = self.config.segment.estimate_tokens(content),
            "Extracting node"
        );

        for seg in &segments {
            if cancel.is_cancelled() {
                result.status = ExtractionStatus::Cancelled;
                break;
            }

            let ai = self.ai;
            let text = seg.text.as_str();
            let digest = memory.digest().map(str::to_string);
            let digest = digest.as_deref();

            result.calls += 1;
            let outcome = call_with_retry(Service::Extraction, self.policy, cancel, move || {
                ai.extract(subject, text, digest)
            })
            .await;

            match outcome {
                Ok(items) => {
                    debug!(
                        node_id = %node_id,
                        segment = seg.index,
                        tokens = seg.tokens,
                        items = items.len(),
                        with_memory = digest.is_some(),
                        "Segment extracted"
                    );
                    result.segments_processed += 1;
                    memory.push(&items);
                    result.items.extend(items);
                }
                Err(ExtractionError::Cancelled) => {
                    result.status = ExtractionStatus::Cancelled;
                    break;
                }
                Err(e) => {
                    warn!(
                        node_id = %node_id,
                        segment = seg.index,
                        error = %e,
                        "Segment extraction failed, continuing with next segment"
                    );
                    result.failed_segments.push(seg.index);
                }
            }
        }

        if self.config.dedup_items {
            let items = std::mem::take(&mut result.items);
            let (kept, dropped) = dedup_items(items, self.config.dedup_similarity);
            result.items = kept;
            result.duplicates_dropped = dropped;
        }

        let result = result.finish();
        info!(
            node_id = %node_id,
            status = ?result.status,
            items = result.items.len(),
            calls = result.calls,
            failed_segments = result.failed_segments.len(),
            "Node extraction finished"
        );
        result
    }
}

/// Extract one node's content with the given configuration.
pub async fn extract_node<A: AI + ?Sized>(
    ai: &A,
    subject: &str,
    node_id: &str,
    content: &str,
    config: &ExtractionConfig,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<NodeExtraction> {
    if subject.trim().is_empty() {
        return Err(ExtractionError::InvalidQuery {
            reason: "subject is empty".into(),
        });
    }
    Ok(Extractor::new(ai, config, policy)
        .extract_node(subject, node_id, content, cancel)
        .await)
}
