//! Core extraction types - the output of the extraction orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record fields tried, in order, when deriving an item's digest line.
const DIGEST_FIELDS: &[&str] = &["statement", "text", "summary", "title", "name", "description"];

/// One structured record returned by the extraction service.
///
/// The record's schema is opaque to this library; only the `digest` line is
/// interpreted, to build the memory passed to later segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    /// Compact one-line description used in memory digests
    pub digest: String,

    /// The service's record, untouched
    pub record: serde_json::Value,
}

impl ExtractedItem {
    /// Create an item with an explicit digest line.
    pub fn new(digest: impl Into<String>, record: serde_json::Value) -> Self {
        Self {
            digest: digest.into(),
            record,
        }
    }

    /// Create a plain-text item.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            record: serde_json::Value::String(text.clone()),
            digest: text,
        }
    }

    /// Wrap a service record, deriving the digest from common text fields.
    ///
    /// Falls back to the compact JSON rendering of the record.
    pub fn from_record(record: serde_json::Value) -> Self {
        let digest = match &record {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => DIGEST_FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| record.to_string()),
            other => other.to_string(),
        };

        Self {
            digest: collapse_whitespace(&digest),
            record,
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Overall status of one node's extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every segment was processed.
    #[default]
    Complete,

    /// Some segments failed after retries; their items are missing.
    Partial,

    /// No segment could be processed.
    Failed,

    /// The run was cancelled before this node finished.
    Cancelled,
}

/// Accumulated items for one graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExtraction {
    pub node_id: String,

    /// Items of all segments, in segment order
    pub items: Vec<ExtractedItem>,

    /// Number of segments the content was split into (1 if not split)
    pub segments_total: usize,

    /// Segments that got a usable response
    pub segments_processed: usize,

    /// Indices of segments whose calls were exhausted
    #[serde(default)]
    pub failed_segments: Vec<usize>,

    /// Extraction calls issued, retries excluded
    pub calls: usize,

    /// Items dropped by the optional dedup pass
    #[serde(default)]
    pub duplicates_dropped: usize,

    pub status: ExtractionStatus,

    pub completed_at: DateTime<Utc>,
}

impl NodeExtraction {
    /// Create an empty result for a node.
    pub fn new(node_id: impl Into<String>, segments_total: usize) -> Self {
        Self {
            node_id: node_id.into(),
            items: Vec::new(),
            segments_total,
            segments_processed: 0,
            failed_segments: Vec::new(),
            calls: 0,
            duplicates_dropped: 0,
            status: ExtractionStatus::Complete,
            completed_at: Utc::now(),
        }
    }

    /// Result for a node the run never reached.
    pub fn cancelled(node_id: impl Into<String>) -> Self {
        let mut result = Self::new(node_id, 0);
        result.status = ExtractionStatus::Cancelled;
        result
    }

    /// Result for a node whose content could not be read.
    pub fn failed(node_id: impl Into<String>) -> Self {
        let mut result = Self::new(node_id, 0);
        result.status = ExtractionStatus::Failed;
        result
    }

    /// Derive the status from processed / failed counts.
    pub fn calculate_status(&self) -> ExtractionStatus {
        if self.status == ExtractionStatus::Cancelled {
            return ExtractionStatus::Cancelled;
        }
        if self.segments_processed == 0 && self.segments_total > 0 {
            return ExtractionStatus::Failed;
        }
        if !self.failed_segments.is_empty() {
            return ExtractionStatus::Partial;
        }
        ExtractionStatus::Complete
    }

    /// Close the pass: set status and completion time.
    pub fn finish(mut self) -> Self {
        self.status = self.calculate_status();
        self.completed_at = Utc::now();
        self
    }

    /// Whether every segment was processed.
    pub fn is_complete(&self) -> bool {
        self.status == ExtractionStatus::Complete
    }
}
