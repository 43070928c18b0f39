//! Retrieval result types.

use serde::{Deserialize, Serialize};

/// Retrieval strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Keyword match against titles and summaries
    Lexical,
    /// Cosine similarity against summary embeddings
    Semantic,
    /// Both, merged by node id
    Hybrid,
}

impl Default for RetrievalMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

/// Which retrieval path produced a candidate's score.
///
/// Lexical scores are a flat placeholder and must never be mistaken for a
/// cosine similarity when merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Lexical,
    Semantic,
}

/// A ranked retrieval candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub node_id: String,

    /// Relevance in [0,1]; meaning depends on `source`
    pub score: f32,

    pub source: ScoreSource,
}

impl CandidateResult {
    /// Create a lexical candidate.
    pub fn lexical(node_id: impl Into<String>, score: f32) -> Self {
        Self {
            node_id: node_id.into(),
            score: score.clamp(0.0, 1.0),
            source: ScoreSource::Lexical,
        }
    }

    /// Create a semantic candidate.
    pub fn semantic(node_id: impl Into<String>, score: f32) -> Self {
        Self {
            node_id: node_id.into(),
            score: score.clamp(0.0, 1.0),
            source: ScoreSource::Semantic,
        }
    }
}

/// Order candidates by descending score, ties by ascending node id.
pub fn rank_candidates(candidates: &mut [CandidateResult]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}

/// Response of the retrieval coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    /// Ranked candidates
    pub candidates: Vec<CandidateResult>,

    /// Mode the caller asked for
    pub requested: RetrievalMode,

    /// Mode that actually produced the candidates
    pub effective: RetrievalMode,

    /// Keywords used for the lexical path (empty if it did not run)
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Set when a retrieval path failed and a fallback was used
    pub degraded: bool,

    /// Why the response is degraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl RetrievalResponse {
    /// Create a non-degraded response.
    pub fn new(requested: RetrievalMode, effective: RetrievalMode) -> Self {
        Self {
            candidates: Vec::new(),
            requested,
            effective,
            keywords: Vec::new(),
            degraded: false,
            degraded_reason: None,
        }
    }

    /// Mark the response degraded.
    pub fn degrade(&mut self, reason: impl Into<String>) {
        self.degraded = true;
        self.degraded_reason = Some(reason.into());
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no candidates were found.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_candidates_breaks_ties_by_id() {
        let mut candidates = vec![
            CandidateResult::semantic("b", 0.5),
            CandidateResult::semantic("c", 0.9),
            CandidateResult::semantic("a", 0.5),
        ];
        rank_candidates(&mut candidates);

        let ids: Vec<_> = candidates.iter().map(|c| c.node_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_scores_are_clamped() {
        assert_eq!(CandidateResult::semantic("a", -0.2).score, 0.0);
        assert_eq!(CandidateResult::lexical("a", 1.7).score, 1.0);
    }
}
