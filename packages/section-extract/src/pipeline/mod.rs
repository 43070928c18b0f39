//! Extraction pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Retrieval (lexical, semantic or hybrid candidates with fallback)
//! - Traversal (relevance-scored, threshold-pruned graph walk)
//! - Segmentation (structure-aware, lossless)
//! - Extraction with a memory digest carried across segments
//! - Optional near-duplicate removal

pub mod dedup;
pub mod extract;
pub mod index;
pub mod keywords;
pub mod memory;
pub mod recall;
pub mod response;
pub mod retry;
pub mod segment;
pub mod traverse;

pub use dedup::{dedup_items, fingerprint};
pub use extract::{extract_node, Extractor};
pub use index::Pipeline;
pub use keywords::{extract_keywords, keyword_pattern};
pub use memory::{build_digest, ExtractionMemory};
pub use recall::{merge_hybrid, RetrievalCoordinator};
pub use response::{coerce_score, parse_extraction_response, parse_score};
pub use retry::call_with_retry;
pub use segment::{scan_blocks, segment};
pub use traverse::{traverse, TraversalRoot, Traverser};
