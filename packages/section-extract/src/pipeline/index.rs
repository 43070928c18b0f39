//! The Pipeline - main entry point for the extraction library.
//!
//! Wires retrieval, traversal and extraction over one corpus store and one
//! AI service. Each stage is also exposed as a primitive so callers can run
//! it on its own or replace a stage with their own logic.

use async_stream::stream;
use chrono::Utc;
use futures::{stream as futures_stream, Stream, StreamExt};
use std::collections::HashSet;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ExtractionError, Result};
use crate::pipeline::extract::Extractor;
use crate::pipeline::recall::RetrievalCoordinator;
use crate::pipeline::traverse::{traverse, Traverser};
use crate::traits::{ai::AI, store::CorpusStore};
use crate::types::{
    candidate::{CandidateResult, RetrievalMode, RetrievalResponse},
    config::PipelineConfig,
    extraction::NodeExtraction,
    outcome::PipelineOutcome,
    traversal::TraversalOutcome,
};

/// The main entry point: subject in, extracted items out.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = Pipeline::new(store, ai);
/// let cancel = CancellationToken::new();
///
/// let outcome = pipeline.run("triage categories", &cancel).await?;
/// for item in outcome.items() {
///     println!("{}", item.digest);
/// }
/// ```
pub struct Pipeline<S: CorpusStore, A: AI> {
    store: S,
    ai: A,
    config: PipelineConfig,
}

impl<S: CorpusStore, A: AI> Pipeline<S, A> {
    /// Create a new pipeline.
    pub fn new(store: S, ai: A) -> Self {
        Self {
            store,
            ai,
            config: PipelineConfig::default(),
        }
    }

    /// Create with custom configuration.
    pub fn with_config(store: S, ai: A, config: PipelineConfig) -> Self {
        Self { store, ai, config }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a reference to the AI.
    pub fn ai(&self) -> &A {
        &self.ai
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    /// PRIMITIVE: Retrieve candidates with the configured mode and `top_k`.
    pub async fn retrieve(
        &self,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse> {
        let mode = self.config.retrieval.mode;
        self.retrieve_with(subject, mode, self.config.retrieval.top_k(mode), cancel)
            .await
    }

    /// PRIMITIVE: Retrieve candidates with an explicit mode and `top_k`.
    pub async fn retrieve_with(
        &self,
        subject: &str,
        mode: RetrievalMode,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse> {
        RetrievalCoordinator::new(&self.store, &self.ai, &self.config.retrieval, &self.config.retry)
            .retrieve(subject, mode, top_k, cancel)
            .await
    }

    /// PRIMITIVE: Traverse the graph from the given candidates.
    ///
    /// Threshold widening applies; candidate growth does not, since the
    /// caller owns retrieval here.
    pub async fn traverse(
        &self,
        subject: &str,
        candidates: &[CandidateResult],
        cancel: &CancellationToken,
    ) -> Result<TraversalOutcome> {
        traverse(
            &self.store,
            &self.ai,
            subject,
            candidates,
            &self.config.traversal,
            &self.config.retry,
            cancel,
        )
        .await
    }

    /// PRIMITIVE: Read the raw text behind a node.
    pub async fn read_content(&self, node_id: &str) -> Result<String> {
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| ExtractionError::NodeNotFound {
                id: node_id.to_string(),
            })?;
        self.store.read(&node.source).await
    }

    /// PRIMITIVE: Extract items about `subject` from one node.
    pub async fn extract_node(
        &self,
        subject: &str,
        node_id: &str,
        cancel: &CancellationToken,
    ) -> Result<NodeExtraction> {
        let content = self.read_content(node_id).await?;
        Ok(
            Extractor::new(&self.ai, &self.config.extraction, &self.config.retry)
                .extract_node(subject, node_id, &content, cancel)
                .await,
        )
    }

    // =========================================================================
    // High-Level API
    // =========================================================================

    /// HIGH-LEVEL: Full pipeline run.
    ///
    /// Retrieves candidates, traverses with widening, then extracts every
    /// accepted node (bounded by the extraction concurrency). Extractions
    /// are returned in traversal rank order. After cancellation the nodes
    /// not yet extracted are reported as `Cancelled`.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, subject: &str, cancel: &CancellationToken) -> Result<PipelineOutcome> {
        let started_at = Utc::now();

        let retrieval = self.retrieve(subject, cancel).await?;
        info!(
            candidates = retrieval.len(),
            effective = ?retrieval.effective,
            degraded = retrieval.degraded,
            "Retrieved candidates"
        );

        let traversal = self.traverse_with_growth(subject, &retrieval, cancel).await?;

        let extractions: Vec<NodeExtraction> = futures_stream::iter(
            traversal
                .accepted
                .iter()
                .map(|node| self.extract_or_report(subject, &node.node_id, cancel)),
        )
        .buffered(self.config.extraction.concurrency.max(1))
        .collect()
        .await;

        let outcome = PipelineOutcome {
            run_id: traversal.run_id,
            subject: subject.to_string(),
            retrieval,
            traversal,
            extractions,
            cancelled: cancel.is_cancelled(),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            run_id = %outcome.run_id,
            nodes = outcome.extractions.len(),
            items = outcome.item_count(),
            cancelled = outcome.cancelled,
            degraded = outcome.is_degraded(),
            "Pipeline run complete"
        );
        Ok(outcome)
    }

    /// Return a stream of node extractions.
    ///
    /// Yields each node's result in the given order as soon as it is done.
    /// Once cancelled, the remaining nodes are yielded as `Cancelled`.
    pub fn extract_stream(
        &self,
        subject: &str,
        node_ids: Vec<String>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Stream<Item = Result<NodeExtraction>> + Send + '_>> {
        let subject = subject.to_string();
        Box::pin(stream! {
            for node_id in node_ids {
                if cancel.is_cancelled() {
                    yield Ok(NodeExtraction::cancelled(node_id));
                    continue;
                }
                yield self.extract_node(&subject, &node_id, &cancel).await;
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Traverse, then re-retrieve with a grown `top_k` if still short.
    ///
    /// New roots are walked inside the same run, so nodes already scored
    /// are never scored again.
    async fn traverse_with_growth(
        &self,
        subject: &str,
        retrieval: &RetrievalResponse,
        cancel: &CancellationToken,
    ) -> Result<TraversalOutcome> {
        let config = &self.config.traversal;
        let traverser = Traverser::new(
            &self.store,
            &self.ai,
            subject,
            config,
            &self.config.retry,
            cancel,
        );

        let roots = traverser.anchor(&retrieval.candidates).await?;
        traverser.walk_roots(roots).await?;
        traverser.widen().await?;

        let short = traverser.accepted_count().await < config.min_results;
        if short && !traverser.is_cancelled() && config.candidate_growth > 1 {
            let top_k = self
                .config
                .retrieval
                .top_k(retrieval.requested)
                .saturating_mul(config.candidate_growth);

            match self
                .retrieve_with(subject, retrieval.requested, top_k, cancel)
                .await
            {
                Ok(grown) => {
                    let known: HashSet<&str> = retrieval
                        .candidates
                        .iter()
                        .map(|c| c.node_id.as_str())
                        .collect();
                    let fresh: Vec<CandidateResult> = grown
                        .candidates
                        .into_iter()
                        .filter(|c| !known.contains(c.node_id.as_str()))
                        .collect();

                    info!(
                        run_id = %traverser.run_id(),
                        top_k = top_k,
                        fresh = fresh.len(),
                        "Too few relevant nodes, growing candidate set"
                    );
                    if !fresh.is_empty() {
                        let roots = traverser.anchor(&fresh).await?;
                        traverser.walk_roots(roots).await?;
                        traverser.widen().await?;
                    }
                }
                Err(ExtractionError::Cancelled) => {}
                Err(e) => {
                    warn!(
                        run_id = %traverser.run_id(),
                        error = %e,
                        "Candidate growth retrieval failed, keeping current result"
                    );
                }
            }
        }

        Ok(traverser.finish().await)
    }

    /// Extract a node, turning errors into a status on the result.
    async fn extract_or_report(
        &self,
        subject: &str,
        node_id: &str,
        cancel: &CancellationToken,
    ) -> NodeExtraction {
        if cancel.is_cancelled() {
            return NodeExtraction::cancelled(node_id);
        }
        match self.extract_node(subject, node_id, cancel).await {
            Ok(extraction) => extraction,
            Err(ExtractionError::Cancelled) => NodeExtraction::cancelled(node_id),
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Could not extract node");
                NodeExtraction::failed(node_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{MockAI, MockFailure, TestCorpus};
    use crate::types::config::{RetrievalConfig, RetryPolicy, TraversalConfig};
    use crate::types::extraction::ExtractionStatus;
    use std::time::Duration;

    const SUBJECT: &str = "triage categories";

    fn corpus() -> MemoryStore {
        TestCorpus::new()
            .root("doc", "Manual")
            .section("doc", "triage", "Triage")
            .section("triage", "red", "Red")
            .section("triage", "green", "Green")
            .embedding("triage", vec![1.0, 0.0])
            .text("triage", "Sort patients by urgency.\n")
            .text("red", "Immediate care\nAirway first\n")
            .text("green", "Can wait\n")
            .build()
    }

    fn ai() -> MockAI {
        MockAI::new()
            .with_embedding(SUBJECT, vec![1.0, 0.0])
            .with_scores([("doc", 0.8), ("triage", 0.9), ("red", 0.85), ("green", 0.2)])
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_retrieval(
                RetrievalConfig::default()
                    .with_mode(RetrievalMode::Semantic)
                    .with_top_k(1),
            )
            .with_traversal(TraversalConfig::default().with_min_results(3))
            .with_retry(
                RetryPolicy::default()
                    .with_max_attempts(2)
                    .with_initial_backoff(Duration::from_millis(1))
                    .with_call_timeout(Duration::from_secs(5)),
            )
    }

    #[tokio::test]
    async fn test_run_extracts_accepted_nodes_in_rank_order() {
        let pipeline = Pipeline::with_config(corpus(), ai(), config());

        let outcome = pipeline.run(SUBJECT, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.traversal.accepted_ids(), vec!["triage", "red", "doc"]);
        let order: Vec<_> = outcome.extractions.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(order, vec!["triage", "red", "doc"]);

        let digests: Vec<_> = outcome.items().map(|i| i.digest.as_str()).collect();
        assert_eq!(digests, vec!["Sort patients by urgency.", "Immediate care", "Airway first"]);
        assert_eq!(outcome.run_id, outcome.traversal.run_id);
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start() {
        let pipeline = Pipeline::with_config(corpus(), ai(), config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pipeline.run(SUBJECT, &cancel).await;
        assert!(matches!(result, Err(ExtractionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_during_extraction_reports_remaining_nodes() {
        let ai = ai().fail_extraction("Airway", MockFailure::Hang, usize::MAX);
        let mut config = config();
        config.extraction.concurrency = 1;
        let pipeline = Pipeline::with_config(corpus(), ai, config);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = pipeline.run(SUBJECT, &cancel).await.unwrap();

        assert!(outcome.cancelled);
        let statuses: Vec<_> = outcome.extractions.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExtractionStatus::Complete,
                ExtractionStatus::Cancelled,
                ExtractionStatus::Cancelled
            ]
        );
    }

    #[tokio::test]
    async fn test_candidate_growth_adds_roots() {
        let store = TestCorpus::new()
            .root("alpha", "Alpha")
            .root("bravo", "Bravo")
            .embedding("alpha", vec![1.0, 0.0])
            .embedding("bravo", vec![0.9, 0.1])
            .build();
        let ai = MockAI::new()
            .with_embedding(SUBJECT, vec![1.0, 0.0])
            .with_scores([("alpha", 0.9), ("bravo", 0.8)]);
        let mut config = config();
        config.traversal = TraversalConfig::default()
            .with_min_results(2)
            .with_anchor_levels(0);

        let pipeline = Pipeline::with_config(store, ai, config);
        let retrieval = pipeline.retrieve(SUBJECT, &CancellationToken::new()).await.unwrap();
        assert_eq!(retrieval.len(), 1);

        let outcome = pipeline.run(SUBJECT, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.traversal.accepted_ids(), vec!["alpha", "bravo"]);
        assert!(!outcome.traversal.underflow);
        assert_eq!(pipeline.ai().score_calls().iter().filter(|id| *id == "alpha").count(), 1);
    }

    #[tokio::test]
    async fn test_read_content_unknown_node() {
        let pipeline = Pipeline::with_config(corpus(), ai(), config());

        let err = pipeline.read_content("missing").await.unwrap_err();
        assert!(matches!(err, ExtractionError::NodeNotFound { .. }));

        let text = pipeline.read_content("red").await.unwrap();
        assert_eq!(text, "Immediate care\nAirway first\n");
    }

    #[tokio::test]
    async fn test_extract_stream_yields_in_order() {
        let pipeline = Pipeline::with_config(corpus(), ai(), config());
        let cancel = CancellationToken::new();

        let results: Vec<_> = pipeline
            .extract_stream(SUBJECT, vec!["red".into(), "missing".into(), "green".into()], cancel)
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().items.len(), 2);
        assert!(matches!(results[1], Err(ExtractionError::NodeNotFound { .. })));
        assert_eq!(results[2].as_ref().unwrap().node_id, "green");
    }
}
