//! Retrieval coordinator for finding candidate nodes.
//!
//! Implements lexical, semantic and hybrid retrieval over the document
//! graph, falling back to the other path when one store or service is down.

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExtractionError, Result, Service};
use crate::pipeline::keywords::{extract_keywords, keyword_hits, keyword_pattern};
use crate::pipeline::retry::call_with_retry;
use crate::traits::ai::AI;
use crate::traits::store::{GraphStore, VectorIndex};
use crate::types::candidate::{rank_candidates, CandidateResult, RetrievalMode, RetrievalResponse};
use crate::types::config::{RetrievalConfig, RetryPolicy};

/// Merge semantic and lexical candidates by node id.
///
/// Where both paths found a node the semantic score wins. The union is
/// ranked by score desc, ties by id asc, and truncated to `top_k`.
pub fn merge_hybrid(
    semantic: Vec<CandidateResult>,
    lexical: Vec<CandidateResult>,
    top_k: usize,
) -> Vec<CandidateResult> {
    let mut merged: IndexMap<String, CandidateResult> = IndexMap::new();
    for candidate in semantic {
        merged.insert(candidate.node_id.clone(), candidate);
    }
    for candidate in lexical {
        merged.entry(candidate.node_id.clone()).or_insert(candidate);
    }

    let mut candidates: Vec<_> = merged.into_values().collect();
    rank_candidates(&mut candidates);
    candidates.truncate(top_k);
    candidates
}

/// Whether a failed retrieval path may be replaced by the other one.
fn can_fall_back(error: &ExtractionError) -> bool {
    !matches!(
        error,
        ExtractionError::Cancelled | ExtractionError::InvalidQuery { .. }
    )
}

/// Pick the error to report when both paths failed.
fn both_failed(semantic: ExtractionError, lexical: ExtractionError) -> ExtractionError {
    match (&semantic, &lexical) {
        (ExtractionError::Cancelled, _) | (_, ExtractionError::Cancelled) => ExtractionError::Cancelled,
        (_, ExtractionError::StoreUnavailable { .. }) => lexical,
        _ => semantic,
    }
}

/// Runs retrieval against a store and an AI service.
pub struct RetrievalCoordinator<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    ai: &'a A,
    config: &'a RetrievalConfig,
    policy: &'a RetryPolicy,
}

impl<'a, S, A> RetrievalCoordinator<'a, S, A>
where
    S: GraphStore + VectorIndex + ?Sized,
    A: AI + ?Sized,
{
    /// Create a coordinator.
    pub fn new(store: &'a S, ai: &'a A, config: &'a RetrievalConfig, policy: &'a RetryPolicy) -> Self {
        Self {
            store,
            ai,
            config,
            policy,
        }
    }

    /// Retrieve up to `top_k` ranked candidates for `subject`.
    ///
    /// A failed path degrades to the other one and flags the response.
    /// Fails with `InvalidQuery` on an empty subject and with the store
    /// error when no path can run.
    pub async fn retrieve(
        &self,
        subject: &str,
        mode: RetrievalMode,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse> {
        if subject.trim().is_empty() {
            return Err(ExtractionError::InvalidQuery {
                reason: "subject is empty".into(),
            });
        }
        if top_k == 0 {
            return Err(ExtractionError::InvalidQuery {
                reason: "top_k must be positive".into(),
            });
        }

        let keywords = extract_keywords(subject, self.config);
        debug!(mode = ?mode, top_k, keywords = ?keywords, "Retrieving candidates");

        let response = match mode {
            RetrievalMode::Lexical => match self.lexical(&keywords, top_k).await {
                Ok(candidates) => self.respond(mode, mode, candidates, &keywords),
                Err(e) if can_fall_back(&e) => {
                    let reason = format!("lexical path failed: {e}");
                    let candidates = self
                        .semantic(subject, top_k, cancel)
                        .await
                        .map_err(|se| both_failed(se, e))?;
                    let mut response =
                        self.respond(mode, RetrievalMode::Semantic, candidates, &[]);
                    self.degrade(&mut response, reason);
                    response
                }
                Err(e) => return Err(e),
            },

            RetrievalMode::Semantic => match self.semantic(subject, top_k, cancel).await {
                Ok(candidates) => self.respond(mode, mode, candidates, &[]),
                Err(e) if can_fall_back(&e) => {
                    let reason = format!("semantic path failed: {e}");
                    let candidates = self
                        .lexical(&keywords, top_k)
                        .await
                        .map_err(|le| both_failed(e, le))?;
                    let mut response =
                        self.respond(mode, RetrievalMode::Lexical, candidates, &keywords);
                    self.degrade(&mut response, reason);
                    response
                }
                Err(e) => return Err(e),
            },

            RetrievalMode::Hybrid => {
                let (semantic, lexical) = tokio::join!(
                    self.semantic(subject, top_k, cancel),
                    self.lexical(&keywords, top_k)
                );

                match (semantic, lexical) {
                    (Ok(semantic), Ok(lexical)) => {
                        let merged = merge_hybrid(semantic, lexical, top_k);
                        self.respond(mode, mode, merged, &keywords)
                    }
                    (Ok(semantic), Err(ExtractionError::InvalidQuery { reason })) => {
                        debug!(reason = %reason, "Lexical path skipped");
                        self.respond(mode, RetrievalMode::Semantic, semantic, &[])
                    }
                    (Ok(semantic), Err(e)) if can_fall_back(&e) => {
                        let mut response =
                            self.respond(mode, RetrievalMode::Semantic, semantic, &[]);
                        self.degrade(&mut response, format!("lexical path failed: {e}"));
                        response
                    }
                    (Err(e), Ok(lexical)) if can_fall_back(&e) => {
                        let mut response =
                            self.respond(mode, RetrievalMode::Lexical, lexical, &keywords);
                        self.degrade(&mut response, format!("semantic path failed: {e}"));
                        response
                    }
                    (Err(se), Err(le)) => return Err(both_failed(se, le)),
                    (Err(e), _) | (_, Err(e)) => return Err(e),
                }
            }
        };

        debug!(
            effective = ?response.effective,
            candidates = response.len(),
            degraded = response.degraded,
            "Retrieval complete"
        );
        Ok(response)
    }

    /// Nodes whose title or summary matches any keyword.
    ///
    /// Every hit gets the configured lexical placeholder score; order is by
    /// distinct keywords hit desc, then id asc.
    pub async fn lexical(&self, keywords: &[String], top_k: usize) -> Result<Vec<CandidateResult>> {
        let pattern = keyword_pattern(keywords)?;
        let matches = self
            .store
            .find_matching(&pattern, self.config.lexical_scan_limit)
            .await?;

        let mut hits: IndexMap<String, usize> = IndexMap::new();
        for m in matches {
            let count = keyword_hits(keywords, &format!("{} {}", m.title, m.summary));
            hits.entry(m.id).or_insert(count);
        }

        let mut ranked: Vec<(String, usize)> = hits.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .map(|(id, _)| CandidateResult::lexical(id, self.config.lexical_score))
            .collect())
    }

    /// Nodes most similar to the embedded subject.
    pub async fn semantic(
        &self,
        subject: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateResult>> {
        let ai = self.ai;
        let embedding =
            call_with_retry(Service::Embedding, self.policy, cancel, move || ai.embed(subject))
                .await?;

        let scan = self.store.similarity_scan(&embedding, top_k).await?;

        let mut candidates: Vec<_> = scan
            .into_iter()
            .map(|(id, score)| CandidateResult::semantic(id, score))
            .collect();
        rank_candidates(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn respond(
        &self,
        requested: RetrievalMode,
        effective: RetrievalMode,
        candidates: Vec<CandidateResult>,
        keywords: &[String],
    ) -> RetrievalResponse {
        let mut response = RetrievalResponse::new(requested, effective);
        response.candidates = candidates;
        response.keywords = keywords.to_vec();
        response
    }

    fn degrade(&self, response: &mut RetrievalResponse, reason: String) {
        warn!(
            requested = ?response.requested,
            effective = ?response.effective,
            reason = %reason,
            "Retrieval degraded"
        );
        response.degrade(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAI, MockFailure, TestCorpus};
    use crate::types::candidate::ScoreSource;
    use crate::stores::MemoryStore;

    const SUBJECT: &str = "Identify the triage categories and criteria";

    fn unit(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    fn corpus() -> MemoryStore {
        TestCorpus::new()
            .root("doc", "Emergency Manual")
            .section("doc", "n09", "Triage Categories")
            .summary("n09", "Red, yellow and green triage criteria")
            .embedding("n09", unit(0.9))
            .section("doc", "n05", "Patient Intake")
            .embedding("n05", unit(0.5))
            .section("doc", "n01", "Parking")
            .embedding("n01", unit(0.1))
            .section("doc", "crit", "Admission Criteria")
            .build()
    }

    fn ai() -> MockAI {
        MockAI::new().with_embedding(SUBJECT, vec![1.0, 0.0])
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(2)
            .with_initial_backoff(std::time::Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_semantic_top_k_orders_by_similarity() {
        let store = corpus();
        let ai = ai();
        let config = RetrievalConfig::default();
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let response = coordinator
            .retrieve(SUBJECT, RetrievalMode::Semantic, 2, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = response.candidates.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["n09", "n05"]);
        assert!((response.candidates[0].score - 0.9).abs() < 1e-4);
        assert!((response.candidates[1].score - 0.5).abs() < 1e-4);
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn test_lexical_ranks_by_keyword_hits() {
        let store = corpus();
        let ai = ai();
        let config = RetrievalConfig::default();
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let response = coordinator
            .retrieve(SUBJECT, RetrievalMode::Lexical, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.keywords, vec!["triage", "categories", "criteria"]);
        let ids: Vec<_> = response.candidates.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["n09", "crit"]);
        assert!(response
            .candidates
            .iter()
            .all(|c| c.source == ScoreSource::Lexical && c.score == 0.5));
        assert_eq!(ai.embed_count(), 0);
    }

    #[tokio::test]
    async fn test_hybrid_keeps_semantic_score() {
        let store = corpus();
        let ai = ai();
        let config = RetrievalConfig::default().with_lexical_score(0.4);
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let response = coordinator
            .retrieve(SUBJECT, RetrievalMode::Hybrid, 10, &CancellationToken::new())
            .await
            .unwrap();

        let n09 = response.candidates.iter().find(|c| c.node_id == "n09").unwrap();
        assert_eq!(n09.source, ScoreSource::Semantic);
        assert!((n09.score - 0.9).abs() < 1e-4);

        let crit = response.candidates.iter().find(|c| c.node_id == "crit").unwrap();
        assert_eq!(crit.source, ScoreSource::Lexical);

        let ids: Vec<_> = response.candidates.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["n09", "n05", "crit", "n01"]);
        assert_eq!(response.effective, RetrievalMode::Hybrid);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_lexical() {
        let store = corpus();
        let ai = ai().fail_embedding(MockFailure::Unavailable);
        let config = RetrievalConfig::default();
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let response = coordinator
            .retrieve(SUBJECT, RetrievalMode::Semantic, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.degraded);
        assert!(response.degraded_reason.is_some());
        assert_eq!(response.effective, RetrievalMode::Lexical);
        assert!(!response.is_empty());
    }

    #[tokio::test]
    async fn test_graph_down_in_hybrid_uses_semantic() {
        let store = corpus();
        store.set_graph_available(false);
        let ai = ai();
        let config = RetrievalConfig::default();
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let response = coordinator
            .retrieve(SUBJECT, RetrievalMode::Hybrid, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.degraded);
        assert_eq!(response.effective, RetrievalMode::Semantic);
        assert_eq!(response.candidates[0].node_id, "n09");
    }

    #[tokio::test]
    async fn test_both_paths_down_is_store_error() {
        let store = corpus();
        store.set_graph_available(false);
        store.set_vector_available(false);
        let ai = ai();
        let config = RetrievalConfig::default();
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let result = coordinator
            .retrieve(SUBJECT, RetrievalMode::Hybrid, 5, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ExtractionError::StoreUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_empty_subject_is_invalid() {
        let store = corpus();
        let ai = ai();
        let config = RetrievalConfig::default();
        let policy = fast_policy();
        let coordinator = RetrievalCoordinator::new(&store, &ai, &config, &policy);

        let result = coordinator
            .retrieve("   ", RetrievalMode::Hybrid, 5, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExtractionError::InvalidQuery { .. })));
    }

    #[test]
    fn test_merge_hybrid_prefers_semantic() {
        let merged = merge_hybrid(
            vec![CandidateResult::semantic("a", 0.3)],
            vec![CandidateResult::lexical("a", 0.5), CandidateResult::lexical("b", 0.5)],
            5,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].node_id, "b");
        assert_eq!(merged[1].source, ScoreSource::Semantic);
    }
}
