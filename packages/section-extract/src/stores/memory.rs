//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::error::{ExtractionError, Result, Store};
use crate::stores::slice_lines;
use crate::traits::store::{cosine_similarity, rank_similarities, ContentReader, GraphStore, VectorIndex};
use crate::types::node::{Document, GraphNode, NodeMatch, SourceRef};

/// In-memory document graph, vector index and content source.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart. Either backing store can be switched
/// off to exercise the fallback paths.
pub struct MemoryStore {
    // BTreeMap keeps scans in id order
    nodes: RwLock<BTreeMap<String, GraphNode>>,
    documents: RwLock<HashMap<String, Document>>,
    embeddings: RwLock<HashMap<String, Vec<f32>>>,
    contents: RwLock<HashMap<String, String>>,
    graph_available: AtomicBool,
    vector_available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            documents: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(HashMap::new()),
            contents: RwLock::new(HashMap::new()),
            graph_available: AtomicBool::new(true),
            vector_available: AtomicBool::new(true),
        }
    }

    /// Add a node; its embedding (if any) is indexed too.
    pub fn with_node(mut self, node: GraphNode) -> Self {
        if let Some(embedding) = &node.embedding {
            self.embeddings
                .get_mut()
                .insert(node.id.clone(), embedding.clone());
        }
        self.nodes.get_mut().insert(node.id.clone(), node);
        self
    }

    /// Add several nodes.
    pub fn with_nodes(self, nodes: impl IntoIterator<Item = GraphNode>) -> Self {
        nodes.into_iter().fold(self, |store, node| store.with_node(node))
    }

    /// Add a document.
    pub fn with_document(mut self, document: Document) -> Self {
        self.documents
            .get_mut()
            .insert(document.id.clone(), document);
        self
    }

    /// Index an embedding for a node id.
    pub fn with_embedding(mut self, id: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings.get_mut().insert(id.into(), embedding);
        self
    }

    /// Register the full text of a source path.
    pub fn with_content(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.contents.get_mut().insert(path.into(), text.into());
        self
    }

    /// Simulate the graph store going up or down.
    pub fn set_graph_available(&self, available: bool) {
        self.graph_available.store(available, Ordering::SeqCst);
    }

    /// Simulate the vector index going up or down.
    pub fn set_vector_available(&self, available: bool) {
        self.vector_available.store(available, Ordering::SeqCst);
    }

    /// Get a document by id.
    pub async fn get_document(&self, id: &str) -> Option<Document> {
        self.documents.read().await.get(id).cloned()
    }

    /// Get the number of stored nodes.
    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Get the number of stored embeddings.
    pub async fn embedding_count(&self) -> usize {
        self.embeddings.read().await.len()
    }

    fn check_graph(&self) -> Result<()> {
        if self.graph_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExtractionError::store(Store::Graph, "memory graph switched off"))
        }
    }

    fn check_vector(&self) -> Result<()> {
        if self.vector_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExtractionError::store(Store::Vector, "memory vector index switched off"))
        }
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn find_matching(&self, pattern: &Regex, limit: usize) -> Result<Vec<NodeMatch>> {
        self.check_graph()?;
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| pattern.is_match(&n.title) || pattern.is_match(&n.summary))
            .take(limit)
            .map(GraphNode::to_match)
            .collect())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.check_graph()?;
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn get_children(&self, id: &str) -> Result<Vec<GraphNode>> {
        self.check_graph()?;
        let nodes = self.nodes.read().await;
        let Some(node) = nodes.get(id) else {
            return Err(ExtractionError::NodeNotFound { id: id.to_string() });
        };
        Ok(node
            .children
            .iter()
            .filter_map(|child| nodes.get(child).cloned())
            .collect())
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn similarity_scan(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        self.check_vector()?;
        let mut scored: Vec<_> = self
            .embeddings
            .read()
            .await
            .iter()
            .map(|(id, embedding)| (id.clone(), cosine_similarity(query, embedding)))
            .collect();

        rank_similarities(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }
}

#[async_trait]
impl ContentReader for MemoryStore {
    async fn read(&self, source: &SourceRef) -> Result<String> {
        let contents = self.contents.read().await;
        let text = contents.get(&source.path).ok_or_else(|| {
            ExtractionError::store(Store::Content, format!("no content for {}", source.path))
        })?;
        slice_lines(text, source)
    }
}
