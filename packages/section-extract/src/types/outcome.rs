//! Result of a full pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::RetrievalResponse;
use super::extraction::{ExtractedItem, ExtractionStatus, NodeExtraction};
use super::traversal::TraversalOutcome;

/// Everything one `Pipeline::run` produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Same id as the traversal run
    pub run_id: Uuid,

    pub subject: String,

    pub retrieval: RetrievalResponse,

    pub traversal: TraversalOutcome,

    /// One entry per accepted node, in traversal rank order
    pub extractions: Vec<NodeExtraction>,

    pub cancelled: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineOutcome {
    /// All items across nodes, in rank order.
    pub fn items(&self) -> impl Iterator<Item = &ExtractedItem> {
        self.extractions.iter().flat_map(|e| e.items.iter())
    }

    /// Total number of extracted items.
    pub fn item_count(&self) -> usize {
        self.extractions.iter().map(|e| e.items.len()).sum()
    }

    /// Extraction for a node, if it was extracted.
    pub fn extraction(&self, node_id: &str) -> Option<&NodeExtraction> {
        self.extractions.iter().find(|e| e.node_id == node_id)
    }

    /// Whether any stage returned a best-effort result.
    pub fn is_degraded(&self) -> bool {
        self.cancelled
            || self.retrieval.degraded
            || self.traversal.is_degraded()
            || self
                .extractions
                .iter()
                .any(|e| e.status != ExtractionStatus::Complete)
    }
}
