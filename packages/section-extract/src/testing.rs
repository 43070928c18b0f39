//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the extraction library
//! without making real model calls.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ExtractionError, Result, Service};
use crate::stores::MemoryStore;
use crate::traits::ai::AI;
use crate::types::{
    extraction::ExtractedItem,
    node::{Document, GraphNode, SourceRef},
    traversal::ScoringContext,
};

/// How a scripted mock call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable network-style failure
    Transient,
    /// Hard outage, never retried
    Unavailable,
    /// Unusable payload
    Malformed,
    /// Never completes
    Hang,
}

impl MockFailure {
    async fn raise<T>(self, service: Service) -> Result<T> {
        match self {
            Self::Transient => Err(ExtractionError::transient(service, "mock transient failure")),
            Self::Unavailable => Err(ExtractionError::unavailable(service, "mock service down")),
            Self::Malformed => Err(ExtractionError::malformed(service, "mock malformed payload")),
            Self::Hang => std::future::pending().await,
        }
    }
}

/// Scripted failure with a remaining count (`usize::MAX` = always).
type ScriptedFailures = Arc<RwLock<HashMap<String, (MockFailure, usize)>>>;

/// A mock AI implementation for testing.
///
/// Scores are scripted per node id, extraction results per segment marker
/// (any segment containing the marker gets the scripted items). Unscripted
/// calls get deterministic defaults. Clones share scripts and call history.
#[derive(Clone, Default)]
pub struct MockAI {
    /// Predefined embeddings by text
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,

    /// Dimension of generated embeddings
    embedding_dim: usize,

    embed_failure: Arc<RwLock<Option<MockFailure>>>,

    /// Predefined relevance scores by node id
    scores: Arc<RwLock<HashMap<String, f32>>>,

    /// Score for unscripted nodes
    default_score: f32,

    score_failures: ScriptedFailures,

    /// Latency added to score calls by node id
    score_delays: Arc<RwLock<HashMap<String, Duration>>>,

    /// Cancel this token once the given number of score calls has started
    cancel_after: Arc<RwLock<Option<(usize, CancellationToken)>>>,

    /// Predefined extraction results by segment marker
    extractions: Arc<RwLock<Vec<(String, Vec<ExtractedItem>)>>>,

    extraction_failures: ScriptedFailures,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockAICall>>>,
}

/// Record of a call made to the mock AI.
#[derive(Debug, Clone)]
pub enum MockAICall {
    Embed {
        text: String,
    },
    Score {
        node_id: String,
        breadcrumbs: Vec<String>,
    },
    Extract {
        segment: String,
        memory: Option<String>,
    },
}

impl MockAI {
    /// Create a new mock AI with default behavior.
    pub fn new() -> Self {
        Self {
            embedding_dim: 8,
            ..Default::default()
        }
    }

    /// Set the dimension of generated embeddings.
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Add a predefined embedding for text.
    pub fn with_embedding(self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings
            .write()
            .unwrap()
            .insert(text.into(), embedding);
        self
    }

    /// Make every embedding call fail.
    pub fn fail_embedding(self, failure: MockFailure) -> Self {
        *self.embed_failure.write().unwrap() = Some(failure);
        self
    }

    /// Script the relevance score of a node.
    pub fn with_score(self, node_id: impl Into<String>, score: f32) -> Self {
        self.scores.write().unwrap().insert(node_id.into(), score);
        self
    }

    /// Script several scores at once.
    pub fn with_scores<I, K>(self, scores: I) -> Self
    where
        I: IntoIterator<Item = (K, f32)>,
        K: Into<String>,
    {
        scores
            .into_iter()
            .fold(self, |mock, (id, score)| mock.with_score(id, score))
    }

    /// Score for nodes without a scripted score.
    pub fn with_default_score(mut self, score: f32) -> Self {
        self.default_score = score;
        self
    }

    /// Fail the next `times` score calls for a node.
    pub fn fail_score(self, node_id: impl Into<String>, failure: MockFailure, times: usize) -> Self {
        self.score_failures
            .write()
            .unwrap()
            .insert(node_id.into(), (failure, times));
        self
    }

    /// Delay every score call for a node.
    pub fn delay_score(self, node_id: impl Into<String>, delay: Duration) -> Self {
        self.score_delays.write().unwrap().insert(node_id.into(), delay);
        self
    }

    /// Cancel `token` when score call number `after + 1` starts; that call
    /// never completes.
    pub fn cancel_after_scores(self, after: usize, token: CancellationToken) -> Self {
        *self.cancel_after.write().unwrap() = Some((after, token));
        self
    }

    /// Return `items` for any segment containing `marker`.
    pub fn with_extraction(self, marker: impl Into<String>, items: Vec<ExtractedItem>) -> Self {
        self.extractions
            .write()
            .unwrap()
            .push((marker.into(), items));
        self
    }

    /// Fail the next `times` extraction calls on segments containing `marker`.
    pub fn fail_extraction(
        self,
        marker: impl Into<String>,
        failure: MockFailure,
        times: usize,
    ) -> Self {
        self.extraction_failures
            .write()
            .unwrap()
            .insert(marker.into(), (failure, times));
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockAICall> {
        self.calls.read().unwrap().clone()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    /// Node ids of score calls, in call order.
    pub fn score_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockAICall::Score { node_id, .. } => Some(node_id),
                _ => None,
            })
            .collect()
    }

    /// Memory digests passed to extraction calls, in call order.
    pub fn extract_calls(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockAICall::Extract { memory, .. } => Some(memory),
                _ => None,
            })
            .collect()
    }

    /// Number of embedding calls.
    pub fn embed_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockAICall::Embed { .. }))
            .count()
    }

    /// Generate a deterministic embedding based on text.
    fn generate_deterministic_embedding(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        (0..self.embedding_dim)
            .map(|i| (hash[i % 32] as f32 / 127.5) - 1.0)
            .collect()
    }

    /// One item per non-blank, non-heading line.
    fn default_extraction(segment: &str) -> Vec<ExtractedItem> {
        segment
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ExtractedItem::text)
            .collect()
    }

    fn record(&self, call: MockAICall) {
        self.calls.write().unwrap().push(call);
    }

    fn take_failure(failures: &ScriptedFailures, matches: impl Fn(&str) -> bool) -> Option<MockFailure> {
        let mut failures = failures.write().unwrap();
        let (_, (failure, remaining)) = failures
            .iter_mut()
            .find(|(key, (_, remaining))| *remaining > 0 && matches(key))?;
        *remaining -= 1;
        Some(*failure)
    }
}

#[async_trait]
impl AI for MockAI {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.record(MockAICall::Embed {
            text: text.to_string(),
        });

        let failure = *self.embed_failure.read().unwrap();
        if let Some(failure) = failure {
            return failure.raise(Service::Embedding).await;
        }

        let scripted = self.embeddings.read().unwrap().get(text).cloned();
        Ok(scripted.unwrap_or_else(|| self.generate_deterministic_embedding(text)))
    }

    async fn score_relevance(&self, _subject: &str, context: &ScoringContext) -> Result<f32> {
        self.record(MockAICall::Score {
            node_id: context.node_id.clone(),
            breadcrumbs: context.breadcrumbs.clone(),
        });
        let started = self.score_calls().len();

        let trigger = self
            .cancel_after
            .read()
            .unwrap()
            .as_ref()
            .filter(|(after, _)| started > *after)
            .map(|(_, token)| token.clone());
        if let Some(token) = trigger {
            token.cancel();
            return MockFailure::Hang.raise(Service::Scoring).await;
        }

        let delay = self.score_delays.read().unwrap().get(&context.node_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = Self::take_failure(&self.score_failures, |id| id == context.node_id);
        if let Some(failure) = failure {
            return failure.raise(Service::Scoring).await;
        }

        let score = self.scores.read().unwrap().get(&context.node_id).copied();
        Ok(score.unwrap_or(self.default_score))
    }

    async fn extract(
        &self,
        _subject: &str,
        segment: &str,
        memory: Option<&str>,
    ) -> Result<Vec<ExtractedItem>> {
        self.record(MockAICall::Extract {
            segment: segment.to_string(),
            memory: memory.map(str::to_string),
        });

        let failure = Self::take_failure(&self.extraction_failures, |marker| segment.contains(marker));
        if let Some(failure) = failure {
            return failure.raise(Service::Extraction).await;
        }

        let scripted = self
            .extractions
            .read()
            .unwrap()
            .iter()
            .find(|(marker, _)| segment.contains(marker.as_str()))
            .map(|(_, items)| items.clone());
        Ok(scripted.unwrap_or_else(|| Self::default_extraction(segment)))
    }
}

/// Builder for small document graphs backed by a `MemoryStore`.
///
/// Every node gets its own content path `"{id}.md"`; the source line range
/// covers the whole text.
#[derive(Default)]
pub struct TestCorpus {
    nodes: IndexMap<String, GraphNode>,
    documents: Vec<Document>,
    contents: HashMap<String, String>,
}

impl TestCorpus {
    /// Create an empty corpus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document with a level-0 root node of the same id.
    pub fn root(mut self, id: &str, title: &str) -> Self {
        self.documents
            .push(Document::new(id, title, format!("{id}.md")).with_child(id));
        let node = GraphNode::new(id, title, SourceRef::new(format!("{id}.md"), 1, 1))
            .with_document(id);
        self.contents.insert(format!("{id}.md"), format!("# {title}\n"));
        self.nodes.insert(id.to_string(), node);
        self
    }

    /// Add a section under `parent`, one level below it.
    pub fn section(mut self, parent: &str, id: &str, title: &str) -> Self {
        let (level, document) = match self.nodes.get_mut(parent) {
            Some(p) => {
                p.children.push(id.to_string());
                (p.level + 1, p.document_id.clone())
            }
            None => (1, None),
        };

        let mut node = GraphNode::new(id, title, SourceRef::new(format!("{id}.md"), 1, 1))
            .with_level(level)
            .with_parent(parent);
        node.document_id = document;
        self.contents.insert(format!("{id}.md"), format!("# {title}\n"));
        self.nodes.insert(id.to_string(), node);
        self
    }

    /// Add an extra child link without changing the child's parent.
    pub fn link(mut self, parent: &str, child: &str) -> Self {
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(child.to_string());
        }
        self
    }

    /// Set a node's summary.
    pub fn summary(mut self, id: &str, summary: &str) -> Self {
        if let Some(node) = self.nodes.get_mut(id) {
            node.summary = summary.to_string();
        }
        self
    }

    /// Set a node's embedding.
    pub fn embedding(mut self, id: &str, embedding: Vec<f32>) -> Self {
        if let Some(node) = self.nodes.get_mut(id) {
            node.embedding = Some(embedding);
        }
        self
    }

    /// Set a node's raw text.
    pub fn text(mut self, id: &str, text: &str) -> Self {
        if let Some(node) = self.nodes.get_mut(id) {
            node.source.end_line = text.split_inclusive('\n').count().max(1);
            self.contents.insert(node.source.path.clone(), text.to_string());
        }
        self
    }

    /// Build the store.
    pub fn build(self) -> MemoryStore {
        let store = self
            .documents
            .into_iter()
            .fold(MemoryStore::new(), |store, doc| store.with_document(doc));
        let store = self
            .contents
            .into_iter()
            .fold(store, |store, (path, text)| store.with_content(path, text));
        store.with_nodes(self.nodes.into_values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::store::{ContentReader, GraphStore};

    fn context(id: &str) -> ScoringContext {
        ScoringContext {
            node_id: id.to_string(),
            title: id.to_string(),
            summary: String::new(),
            level: 0,
            breadcrumbs: vec![],
        }
    }

    #[tokio::test]
    async fn test_mock_ai_scores_and_tracks_calls() {
        let ai = MockAI::new().with_score("a", 0.9).with_default_score(0.1);

        assert_eq!(ai.score_relevance("s", &context("a")).await.unwrap(), 0.9);
        assert_eq!(ai.score_relevance("s", &context("b")).await.unwrap(), 0.1);
        assert_eq!(ai.score_calls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mock_ai_scripted_failures_run_out() {
        let ai = MockAI::new()
            .with_score("a", 0.8)
            .fail_score("a", MockFailure::Transient, 1);

        assert!(ai.score_relevance("s", &context("a")).await.is_err());
        assert_eq!(ai.score_relevance("s", &context("a")).await.unwrap(), 0.8);
    }

    #[tokio::test]
    async fn test_mock_ai_embed_deterministic() {
        let ai = MockAI::new().with_embedding_dim(16);

        let first = ai.embed("triage").await.unwrap();
        let second = ai.embed("triage").await.unwrap();
        assert_eq!(first.len(), 16);
        assert_eq!(first, second);
        assert_eq!(ai.embed_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_ai_default_extraction() {
        let ai = MockAI::new()
            .with_extraction("SPECIAL", vec![ExtractedItem::text("scripted")]);

        let items = ai.extract("s", "# Heading\nred\n\nyellow\n", None).await.unwrap();
        let digests: Vec<_> = items.iter().map(|i| i.digest.as_str()).collect();
        assert_eq!(digests, vec!["red", "yellow"]);

        let items = ai.extract("s", "a SPECIAL line", Some("1. red")).await.unwrap();
        assert_eq!(items[0].digest, "scripted");
        assert_eq!(ai.extract_calls(), vec![None, Some("1. red".to_string())]);
    }

    #[tokio::test]
    async fn test_test_corpus_builds_hierarchy() {
        let store = TestCorpus::new()
            .root("doc", "Manual")
            .section("doc", "triage", "Triage")
            .section("triage", "red", "Red")
            .text("red", "Immediate care\nAirway\n")
            .build();

        let red = store.get_node("red").await.unwrap().unwrap();
        assert_eq!(red.level, 2);
        assert_eq!(red.parent.as_deref(), Some("triage"));
        assert_eq!(red.document_id.as_deref(), Some("doc"));

        let children = store.get_children("doc").await.unwrap();
        assert_eq!(children.len(), 1);

        let text = store.read(&red.source).await.unwrap();
        assert_eq!(text, "Immediate care\nAirway\n");
    }
}
