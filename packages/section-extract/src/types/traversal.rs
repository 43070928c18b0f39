//! Traversal result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the scoring service sees for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringContext {
    pub node_id: String,
    pub title: String,
    pub summary: String,
    pub level: u32,
    /// Titles from the traversal root down to (excluding) this node
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
}

impl ScoringContext {
    /// Render the context as plain text for a scoring prompt.
    pub fn render(&self) -> String {
        let mut text = String::new();
        if !self.breadcrumbs.is_empty() {
            text.push_str("Path: ");
            text.push_str(&self.breadcrumbs.join(" > "));
            text.push('\n');
        }
        text.push_str("Heading: ");
        text.push_str(&self.title);
        if !self.summary.is_empty() {
            text.push_str("\nSummary: ");
            text.push_str(&self.summary);
        }
        text
    }
}

/// A node visited and scored during traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredNode {
    pub node_id: String,
    pub title: String,
    pub level: u32,

    /// Relevance in [0,1]
    pub score: f32,

    /// Distance from the originating root
    pub depth: usize,

    /// Traversal root this node was discovered from
    pub root_id: String,

    /// Children were enqueued
    pub expanded: bool,

    /// Score is a fallback zero after the scoring call was exhausted
    pub score_failed: bool,
}

/// Sort scored nodes by score desc, then depth asc, then id asc.
pub fn rank_scored(nodes: &mut [ScoredNode]) {
    nodes.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.depth.cmp(&b.depth))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}

/// Final product of a traversal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalOutcome {
    pub run_id: Uuid,

    /// Nodes at or above the effective threshold, ranked
    pub accepted: Vec<ScoredNode>,

    /// Every scored node, ranked
    pub scored: Vec<ScoredNode>,

    /// Threshold the run started with
    pub threshold: f32,

    /// Threshold after widening
    pub effective_threshold: f32,

    /// Number of widening rounds applied
    pub widening_rounds: usize,

    /// Accepted count still below the configured minimum
    pub underflow: bool,

    pub cancelled: bool,

    /// Roots whose walk did not finish
    #[serde(default)]
    pub incomplete_roots: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TraversalOutcome {
    /// Ids of accepted nodes in rank order.
    pub fn accepted_ids(&self) -> Vec<&str> {
        self.accepted.iter().map(|n| n.node_id.as_str()).collect()
    }

    /// Whether the result is best-effort rather than complete.
    pub fn is_degraded(&self) -> bool {
        self.underflow || self.cancelled || !self.incomplete_roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: &str, score: f32, depth: usize) -> ScoredNode {
        ScoredNode {
            node_id: id.to_string(),
            title: id.to_string(),
            level: 0,
            score,
            depth,
            root_id: "r".to_string(),
            expanded: false,
            score_failed: false,
        }
    }

    #[test]
    fn test_rank_scored() {
        let mut nodes = vec![
            scored("b", 0.8, 1),
            scored("a", 0.8, 1),
            scored("c", 0.8, 0),
            scored("d", 0.9, 2),
        ];
        rank_scored(&mut nodes);
        let ids: Vec<_> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_context_render() {
        let ctx = ScoringContext {
            node_id: "n".into(),
            title: "Criteria".into(),
            summary: "When to tag red".into(),
            level: 2,
            breadcrumbs: vec!["Manual".into(), "Triage".into()],
        };
        assert_eq!(
            ctx.render(),
            "Path: Manual > Triage\nHeading: Criteria\nSummary: When to tag red"
        );
    }
}
