//! Storage traits for the document graph, embeddings and raw content.
//!
//! The storage layer is split into focused, read-only traits:
//! - `GraphStore`: nodes, hierarchy links and title/summary matching
//! - `VectorIndex`: node-keyed embeddings and similarity scans
//! - `ContentReader`: exact raw text behind a node's source reference
//! - `CorpusStore`: composite trait combining all three

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::types::node::{GraphNode, NodeMatch, SourceRef};

/// Read access to the hierarchical document graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Nodes whose title or summary matches `pattern`, at most `limit`.
    async fn find_matching(&self, pattern: &Regex, limit: usize) -> Result<Vec<NodeMatch>>;

    /// Fetch a node by id.
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Ordered children of a node.
    async fn get_children(&self, id: &str) -> Result<Vec<GraphNode>>;

    /// Ancestor `levels` steps up, stopping at the topmost node reached.
    ///
    /// `levels = 0` returns the node itself.
    async fn get_ancestor(&self, id: &str, levels: usize) -> Result<Option<GraphNode>> {
        let Some(mut node) = self.get_node(id).await? else {
            return Ok(None);
        };
        for _ in 0..levels {
            let Some(parent_id) = node.parent.clone() else {
                break;
            };
            match self.get_node(&parent_id).await? {
                Some(parent) => node = parent,
                None => break,
            }
        }
        Ok(Some(node))
    }
}

/// Node-id-keyed embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Most similar nodes to `query`, sorted by score descending.
    async fn similarity_scan(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>>;
}

/// Reader for the original document text.
#[async_trait]
pub trait ContentReader: Send + Sync {
    /// Exact text covered by `source`.
    async fn read(&self, source: &SourceRef) -> Result<String>;
}

/// Composite storage trait used by the Pipeline.
pub trait CorpusStore: GraphStore + VectorIndex + ContentReader {}

// Blanket implementation: anything implementing all three traits is a CorpusStore
impl<T: GraphStore + VectorIndex + ContentReader> CorpusStore for T {}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Rank `(id, score)` pairs by score descending, ties by id ascending.
pub fn rank_similarities(scored: &mut [(String, f32)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_similarities_is_deterministic() {
        let mut scored = vec![
            ("n3".to_string(), 0.4),
            ("n2".to_string(), 0.7),
            ("n1".to_string(), 0.4),
        ];
        rank_similarities(&mut scored);
        assert_eq!(scored[0].0, "n2");
        assert_eq!(scored[1].0, "n1");
        assert_eq!(scored[2].0, "n3");
    }
}
