//! Integration tests for full pipeline runs.
//!
//! The corpus is a single Markdown manual on disk. Graph and vectors live
//! in a `MemoryStore`; raw text is read through a `FileContentReader`.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use section_extract::{
    pipeline::segment,
    testing::{MockAI, MockFailure},
    types::segment::reassemble,
    ContentReader, Document, ExtractionConfig, ExtractionError, ExtractionStatus,
    FileContentReader, GraphNode, GraphStore, MemoryStore, NodeMatch, Pipeline, PipelineConfig,
    Result, RetrievalConfig, RetrievalMode, RetryPolicy, SourceRef, VectorIndex,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SUBJECT: &str = "Identify the triage categories and criteria";

const MANUAL: &str = "# Field Manual
Intro text.

## Triage
Triage sorts patients by urgency.

### Categories
- Red: immediate care
- Yellow: urgent care
- Green: minor injuries

| Category | Meaning |
| --- | --- |
| Red | immediate |

### Criteria
Breathing rate above 30 means red.

## Staffing
Shifts rotate weekly.
";

/// Graph and vectors in memory, content from files.
struct FileCorpus {
    graph: MemoryStore,
    files: FileContentReader,
}

#[async_trait]
impl GraphStore for FileCorpus {
    async fn find_matching(&self, pattern: &Regex, limit: usize) -> Result<Vec<NodeMatch>> {
        self.graph.find_matching(pattern, limit).await
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        self.graph.get_node(id).await
    }

    async fn get_children(&self, id: &str) -> Result<Vec<GraphNode>> {
        self.graph.get_children(id).await
    }
}

#[async_trait]
impl VectorIndex for FileCorpus {
    async fn similarity_scan(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        self.graph.similarity_scan(query, limit).await
    }
}

#[async_trait]
impl ContentReader for FileCorpus {
    async fn read(&self, source: &SourceRef) -> Result<String> {
        self.files.read(source).await
    }
}

fn node(id: &str, title: &str, start: usize, end: usize) -> GraphNode {
    GraphNode::new(id, title, SourceRef::new("manual.md", start, end)).with_document("manual")
}

/// Write the manual and index its sections.
fn setup_corpus() -> (TempDir, FileCorpus) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("manual.md"), MANUAL).unwrap();

    let graph = MemoryStore::new()
        .with_document(Document::new("manual", "Field Manual", "manual.md").with_child("manual"))
        .with_nodes([
            node("manual", "Field Manual", 1, 20).with_children(["triage", "staffing"]),
            node("triage", "Triage", 4, 18)
                .with_level(1)
                .with_parent("manual")
                .with_children(["categories", "criteria"])
                .with_embedding(vec![1.0, 0.0, 0.0]),
            node("categories", "Categories", 7, 15)
                .with_level(2)
                .with_parent("triage")
                .with_embedding(vec![0.8, 0.6, 0.0]),
            node("criteria", "Criteria", 16, 18)
                .with_level(2)
                .with_parent("triage"),
            node("staffing", "Staffing", 19, 20)
                .with_level(1)
                .with_parent("manual")
                .with_embedding(vec![0.0, 1.0, 0.0]),
        ]);

    let files = FileContentReader::new(dir.path());
    (dir, FileCorpus { graph, files })
}

fn setup_ai() -> MockAI {
    MockAI::new()
        .with_embedding(SUBJECT, vec![1.0, 0.0, 0.0])
        .with_scores([
            ("manual", 0.5),
            ("triage", 0.9),
            ("categories", 0.95),
            ("criteria", 0.8),
            ("staffing", 0.1),
        ])
}

fn setup_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_retrieval(
            RetrievalConfig::default()
                .with_mode(RetrievalMode::Hybrid)
                .with_top_k(3),
        )
        .with_extraction(
            ExtractionConfig::default()
                .with_single_call_budget(20)
                .with_segment_tokens(20),
        )
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(2)
                .with_initial_backoff(Duration::from_millis(1))
                .with_call_timeout(Duration::from_secs(5)),
        )
}

#[tokio::test]
async fn test_full_run_over_file_corpus() {
    let (_dir, corpus) = setup_corpus();
    let pipeline = Pipeline::with_config(corpus, setup_ai(), setup_config());

    let outcome = pipeline.run(SUBJECT, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.retrieval.effective, RetrievalMode::Hybrid);
    assert_eq!(outcome.retrieval.keywords, vec!["triage", "categories", "criteria"]);

    // The root scoring 0.5 is recorded but its other branch is never visited
    assert_eq!(
        outcome.traversal.accepted_ids(),
        vec!["categories", "triage", "criteria"]
    );
    let mut scored = pipeline.ai().score_calls();
    scored.sort();
    assert_eq!(scored, vec!["categories", "criteria", "manual", "triage"]);

    let order: Vec<_> = outcome.extractions.iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(order, vec!["categories", "triage", "criteria"]);
    assert!(outcome.extractions.iter().all(|e| e.is_complete()));
    assert!(!outcome.is_degraded());
}

#[tokio::test]
async fn test_large_section_is_segmented_with_memory() {
    let (_dir, corpus) = setup_corpus();
    let config = setup_config();
    let segment_config = config.extraction.segment.clone();
    let pipeline = Pipeline::with_config(corpus, setup_ai(), config);

    let content = pipeline.read_content("triage").await.unwrap();
    assert!(content.starts_with("## Triage\n"));
    assert!(content.ends_with("Breathing rate above 30 means red.\n\n"));

    let segments = segment(&content, &segment_config);
    assert!(segments.len() >= 3);
    assert_eq!(reassemble(&segments), content);

    let extraction = pipeline
        .extract_node(SUBJECT, "triage", &CancellationToken::new())
        .await
        .unwrap();

    let calls = pipeline.ai().extract_calls();
    assert_eq!(calls.len(), segments.len());
    assert_eq!(extraction.calls, segments.len());
    assert!(calls[0].is_none());
    assert!(calls[1..].iter().all(|memory| memory.as_deref().is_some_and(|m| !m.is_empty())));

    assert_eq!(extraction.items.len(), 8);
    assert_eq!(extraction.items[0].digest, "Triage sorts patients by urgency.");
    assert_eq!(extraction.items[7].digest, "Breathing rate above 30 means red.");
}

#[tokio::test]
async fn test_embedding_outage_degrades_to_lexical() {
    let (_dir, corpus) = setup_corpus();
    let ai = setup_ai().fail_embedding(MockFailure::Unavailable);
    let pipeline = Pipeline::with_config(corpus, ai, setup_config());

    let outcome = pipeline.run(SUBJECT, &CancellationToken::new()).await.unwrap();

    assert!(outcome.retrieval.degraded);
    assert_eq!(outcome.retrieval.effective, RetrievalMode::Lexical);
    assert_eq!(outcome.extractions.len(), 3);
    assert!(outcome.is_degraded());
}

#[tokio::test]
async fn test_scoring_outage_aborts_run() {
    let (_dir, corpus) = setup_corpus();
    let ai = ["manual", "triage", "categories", "criteria", "staffing"]
        .into_iter()
        .fold(setup_ai(), |ai, id| ai.fail_score(id, MockFailure::Unavailable, usize::MAX));
    let pipeline = Pipeline::with_config(corpus, ai, setup_config());

    let err = pipeline.run(SUBJECT, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ExtractionError::ScoringUnavailable { .. }));
}

#[tokio::test]
async fn test_missing_source_file_fails_node_only() {
    let (dir, corpus) = setup_corpus();
    let pipeline = Pipeline::with_config(corpus, setup_ai(), setup_config());
    std::fs::remove_file(dir.path().join("manual.md")).unwrap();

    let outcome = pipeline.run(SUBJECT, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome.extractions.len(), 3);
    assert!(outcome
        .extractions
        .iter()
        .all(|e| e.status == ExtractionStatus::Failed));
    assert_eq!(outcome.item_count(), 0);
}
