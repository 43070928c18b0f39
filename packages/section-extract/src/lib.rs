//! Section Extraction Library
//!
//! Subject-driven extraction over a hierarchical document graph. Given a
//! natural-language subject, the library finds the relevant sections of a
//! corpus and pulls structured items out of their raw text.
//!
//! # Design Philosophy
//!
//! - Recall first: every stage degrades to a flagged best-effort result
//!   instead of an empty one
//! - Model calls are bounded: timeouts, retries and cancellation apply to
//!   every one of them
//! - Content is never lost: segmentation reproduces its input exactly
//! - Library handles mechanics, the `AI` implementation handles prompts
//!
//! # Usage
//!
//! ```rust,ignore
//! use section_extract::{Pipeline, MemoryStore};
//! use section_extract::testing::MockAI;
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = Pipeline::new(MemoryStore::new(), MockAI::new());
//! let outcome = pipeline.run("triage categories", &CancellationToken::new()).await?;
//!
//! for extraction in &outcome.extractions {
//!     println!("{}: {} items", extraction.node_id, extraction.items.len());
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (AI, GraphStore, VectorIndex, ContentReader)
//! - [`types`] - Data model and configuration
//! - [`pipeline`] - Retrieval, traversal, segmentation and extraction
//! - [`stores`] - Storage implementations (MemoryStore, FileContentReader)
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ExtractionError, Result, Service, Store};
pub use traits::{
    ai::AI,
    store::{ContentReader, CorpusStore, GraphStore, VectorIndex},
};
pub use types::{
    candidate::{CandidateResult, RetrievalMode, RetrievalResponse, ScoreSource},
    config::{
        ExtractionConfig, PipelineConfig, RetrievalConfig, RetryPolicy, SegmentConfig,
        TraversalConfig,
    },
    extraction::{ExtractedItem, ExtractionStatus, NodeExtraction},
    node::{Document, GraphNode, NodeMatch, SourceRef},
    outcome::PipelineOutcome,
    segment::{Block, BlockKind, Segment, SegmentKind},
    traversal::{ScoredNode, ScoringContext, TraversalOutcome},
};

// Re-export Pipeline
pub use pipeline::Pipeline;

// Re-export pipeline components
pub use pipeline::{
    build_digest, call_with_retry, dedup_items, extract_node, parse_extraction_response,
    parse_score, segment, traverse, ExtractionMemory, Extractor, RetrievalCoordinator, Traverser,
};

// Re-export stores
pub use stores::{FileContentReader, MemoryStore};

// Re-export testing utilities
pub use testing::{MockAI, MockFailure, TestCorpus};
