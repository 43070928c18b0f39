//! Relevance-scored, threshold-pruned traversal of the document graph.
//!
//! Candidates are anchored to an ancestor, consolidated into roots and
//! walked breadth-first. Every visited node is scored against the subject;
//! only nodes at or above the threshold have their children expanded. One
//! visited set is shared by all roots of a run, so shared ancestors and
//! cyclic links never cause a node to be scored twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indexmap::{map::Entry, IndexMap};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExtractionError, Result, Service};
use crate::pipeline::response::coerce_score;
use crate::pipeline::retry::call_with_retry;
use crate::traits::ai::AI;
use crate::traits::store::GraphStore;
use crate::types::candidate::CandidateResult;
use crate::types::config::{RetryPolicy, TraversalConfig};
use crate::types::node::GraphNode;
use crate::types::traversal::{rank_scored, ScoredNode, ScoringContext, TraversalOutcome};

/// A consolidated starting point of the walk.
#[derive(Debug, Clone)]
pub struct TraversalRoot {
    pub node: GraphNode,

    /// Best score among the candidates anchored here
    pub score: f32,

    /// Candidate ids anchored to this root
    pub candidates: Vec<String>,
}

/// A node waiting to be scored.
#[derive(Debug)]
struct Frontier {
    node: GraphNode,
    depth: usize,
    /// Score of the node this one was discovered from
    inherited: f32,
    breadcrumbs: Vec<String>,
}

/// Mutable state shared by every walker of one run.
#[derive(Debug)]
pub struct TraversalState {
    visited: HashSet<String>,
    scored: IndexMap<String, ScoredNode>,
    /// Breadcrumbs of each scored node, for later expansion
    paths: HashMap<String, Vec<String>>,
    effective_threshold: f32,
    widening_rounds: usize,
    incomplete_roots: Vec<String>,
    consecutive_failures: usize,
    aborted: Option<usize>,
}

impl TraversalState {
    /// Fresh state for a run starting at `threshold`.
    pub fn new(threshold: f32) -> Self {
        Self {
            visited: HashSet::new(),
            scored: IndexMap::new(),
            paths: HashMap::new(),
            effective_threshold: threshold,
            widening_rounds: 0,
            incomplete_roots: Vec::new(),
            consecutive_failures: 0,
            aborted: None,
        }
    }

    /// Mark `id` visited. Returns false if it already was.
    pub fn visit(&mut self, id: &str) -> bool {
        self.visited.insert(id.to_string())
    }

    /// Number of distinct ids visited.
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Number of nodes at or above the effective threshold.
    pub fn accepted_count(&self) -> usize {
        self.scored.values().filter(|n| self.accepts(n)).count()
    }

    /// Threshold after any widening.
    pub fn effective_threshold(&self) -> f32 {
        self.effective_threshold
    }

    fn accepts(&self, node: &ScoredNode) -> bool {
        !node.score_failed && node.score >= self.effective_threshold
    }

    fn record(&mut self, node: ScoredNode, breadcrumbs: Vec<String>) {
        self.paths.insert(node.node_id.clone(), breadcrumbs);
        self.scored.insert(node.node_id.clone(), node);
    }

    fn mark_incomplete(&mut self, root_id: &str) {
        if !self.incomplete_roots.iter().any(|r| r == root_id) {
            self.incomplete_roots.push(root_id.to_string());
        }
    }
}

/// Accepted node whose children are expanded after the threshold drops.
struct Expansion {
    node_id: String,
    title: String,
    depth: usize,
    score: f32,
    root_id: String,
    breadcrumbs: Vec<String>,
}

/// One traversal run.
///
/// Use [`traverse`] for the common case. The step-wise API (`anchor`,
/// `walk_roots`, `widen`, `finish`) lets callers add roots to a run that is
/// already in progress.
pub struct Traverser<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    ai: &'a A,
    subject: &'a str,
    config: &'a TraversalConfig,
    policy: &'a RetryPolicy,
    cancel: CancellationToken,
    /// Child of `cancel`; also fired when the run aborts
    stop: CancellationToken,
    state: Mutex<TraversalState>,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl<'a, S, A> Traverser<'a, S, A>
where
    S: GraphStore + ?Sized,
    A: AI + ?Sized,
{
    /// Start a run.
    pub fn new(
        store: &'a S,
        ai: &'a A,
        subject: &'a str,
        config: &'a TraversalConfig,
        policy: &'a RetryPolicy,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            store,
            ai,
            subject,
            config,
            policy,
            cancel: cancel.clone(),
            stop: cancel.child_token(),
            state: Mutex::new(TraversalState::new(config.threshold)),
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
        }
    }

    /// Id of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether the caller cancelled the run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Accepted nodes so far.
    pub async fn accepted_count(&self) -> usize {
        self.state.lock().await.accepted_count()
    }

    /// Anchor candidates and consolidate those sharing an anchor.
    ///
    /// Roots keep the order in which their first candidate appeared.
    /// Candidates missing from the graph are skipped.
    pub async fn anchor(&self, candidates: &[CandidateResult]) -> Result<Vec<TraversalRoot>> {
        let mut roots: IndexMap<String, TraversalRoot> = IndexMap::new();

        for candidate in candidates {
            let Some(anchor) = self
                .store
                .get_ancestor(&candidate.node_id, self.config.anchor_levels)
                .await?
            else {
                warn!(node_id = %candidate.node_id, "Candidate not in graph, skipping");
                continue;
            };

            match roots.entry(anchor.id.clone()) {
                Entry::Occupied(mut entry) => {
                    let root = entry.get_mut();
                    root.score = root.score.max(candidate.score);
                    root.candidates.push(candidate.node_id.clone());
                }
                Entry::Vacant(entry) => {
                    entry.insert(TraversalRoot {
                        node: anchor,
                        score: candidate.score,
                        candidates: vec![candidate.node_id.clone()],
                    });
                }
            }
        }

        debug!(
            run_id = %self.run_id,
            candidates = candidates.len(),
            roots = roots.len(),
            "Anchored candidates"
        );
        Ok(roots.into_values().collect())
    }

    /// Walk roots concurrently, bounded by the configured concurrency.
    ///
    /// Cancellation is not an error: unfinished roots are recorded as
    /// incomplete. Fails with `ScoringUnavailable` if the run aborted.
    pub async fn walk_roots(&self, roots: Vec<TraversalRoot>) -> Result<()> {
        // Every root is claimed before any walk starts, so a root nested
        // under another one is always walked from itself at depth 0.
        let roots: Vec<TraversalRoot> = {
            let mut state = self.state.lock().await;
            roots
                .into_iter()
                .filter(|root| {
                    let fresh = state.visit(&root.node.id);
                    if !fresh {
                        debug!(root_id = %root.node.id, "Root already visited, skipping");
                    }
                    fresh
                })
                .collect()
        };

        let walks = roots.into_iter().map(|root| async move {
            let root_id = root.node.id.clone();
            let result = self.walk_root(root).await;
            (root_id, result)
        });
        self.drive(walks).await
    }

    /// Recall safety valve.
    ///
    /// While fewer than `min_results` nodes are accepted, lower the
    /// threshold one step (down to `min_threshold`, for at most
    /// `max_widening_rounds`), re-evaluate the nodes already scored and
    /// expand the newly accepted ones.
    pub async fn widen(&self) -> Result<()> {
        loop {
            if self.stop.is_cancelled() {
                return Ok(());
            }

            let expansions = {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;

                let accepted = state.accepted_count();
                if accepted >= self.config.min_results
                    || state.widening_rounds >= self.config.max_widening_rounds
                    || state.effective_threshold <= self.config.min_threshold
                {
                    return Ok(());
                }

                let previous = state.effective_threshold;
                let threshold = (previous - self.config.threshold_step).max(self.config.min_threshold);
                state.effective_threshold = threshold;
                state.widening_rounds += 1;

                let max_depth = self.config.max_depth;
                let paths = &state.paths;
                let expansions: Vec<Expansion> = state
                    .scored
                    .values_mut()
                    .filter(|n| {
                        !n.expanded && !n.score_failed && n.score >= threshold && n.depth < max_depth
                    })
                    .map(|n| {
                        n.expanded = true;
                        Expansion {
                            node_id: n.node_id.clone(),
                            title: n.title.clone(),
                            depth: n.depth,
                            score: n.score,
                            root_id: n.root_id.clone(),
                            breadcrumbs: paths.get(&n.node_id).cloned().unwrap_or_default(),
                        }
                    })
                    .collect();

                info!(
                    run_id = %self.run_id,
                    accepted = accepted,
                    min_results = self.config.min_results,
                    from = previous,
                    to = threshold,
                    round = state.widening_rounds,
                    expanding = expansions.len(),
                    "Too few relevant nodes, widening threshold"
                );
                expansions
            };

            let walks = expansions.into_iter().map(|expansion| async move {
                let admitted = self
                    .admit_children(
                        &expansion.node_id,
                        &expansion.title,
                        expansion.depth,
                        expansion.score,
                        &expansion.breadcrumbs,
                    )
                    .await;
                let result = match admitted {
                    Ok(queue) => self.walk_queue(&expansion.root_id, queue).await,
                    Err(e) => Err(e),
                };
                (expansion.root_id, result)
            });
            self.drive(walks).await?;
        }
    }

    /// Close the run.
    pub async fn finish(self) -> TraversalOutcome {
        let state = self.state.into_inner();
        let visited = state.visited_count();
        let mut scored: Vec<ScoredNode> = state.scored.into_values().collect();
        rank_scored(&mut scored);

        let accepted: Vec<ScoredNode> = scored
            .iter()
            .filter(|n| !n.score_failed && n.score >= state.effective_threshold)
            .cloned()
            .collect();
        let underflow = accepted.len() < self.config.min_results;
        let cancelled = self.cancel.is_cancelled();

        if underflow {
            warn!(
                run_id = %self.run_id,
                accepted = accepted.len(),
                min_results = self.config.min_results,
                "Traversal returned fewer nodes than requested"
            );
        }
        info!(
            run_id = %self.run_id,
            visited = visited,
            scored = scored.len(),
            accepted = accepted.len(),
            effective_threshold = state.effective_threshold,
            widening_rounds = state.widening_rounds,
            cancelled = cancelled,
            "Traversal complete"
        );

        TraversalOutcome {
            run_id: self.run_id,
            accepted,
            scored,
            threshold: self.config.threshold,
            effective_threshold: state.effective_threshold,
            widening_rounds: state.widening_rounds,
            underflow,
            cancelled,
            incomplete_roots: state.incomplete_roots,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    /// Run walks with bounded concurrency and collect their results.
    async fn drive<I, F>(&self, walks: I) -> Result<()>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = (String, Result<bool>)>,
    {
        let mut results: Vec<(usize, (String, Result<bool>))> = stream::iter(
            walks
                .into_iter()
                .enumerate()
                .map(|(i, walk)| async move { (i, walk.await) }),
        )
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;
        results.sort_by_key(|(i, _)| *i);

        let mut state = self.state.lock().await;
        let mut fatal = None;
        for (_, (root_id, result)) in results {
            match result {
                Ok(true) => {}
                Ok(false) | Err(ExtractionError::Cancelled) => state.mark_incomplete(&root_id),
                Err(e) => {
                    state.mark_incomplete(&root_id);
                    fatal.get_or_insert(e);
                }
            }
        }

        if let Some(failures) = state.aborted {
            return Err(ExtractionError::ScoringUnavailable { failures });
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Walk a root already claimed in the visited set.
    async fn walk_root(&self, root: TraversalRoot) -> Result<bool> {
        let root_id = root.node.id.clone();
        let queue = VecDeque::from([Frontier {
            node: root.node,
            depth: 0,
            inherited: root.score,
            breadcrumbs: Vec::new(),
        }]);
        self.walk_queue(&root_id, queue).await
    }

    /// Breadth-first walk. Returns false if stopped before the queue drained.
    async fn walk_queue(&self, root_id: &str, mut queue: VecDeque<Frontier>) -> Result<bool> {
        while let Some(entry) = queue.pop_front() {
            if self.stop.is_cancelled() {
                return Ok(false);
            }

            let (score, failed) = match self.score(&entry).await {
                Ok(scored) => scored,
                Err(ExtractionError::Cancelled) => return Ok(false),
                Err(e) => return Err(e),
            };

            let expand = {
                let mut state = self.state.lock().await;
                let expand = !failed
                    && score >= state.effective_threshold
                    && entry.depth < self.config.max_depth;
                state.record(
                    ScoredNode {
                        node_id: entry.node.id.clone(),
                        title: entry.node.title.clone(),
                        level: entry.node.level,
                        score,
                        depth: entry.depth,
                        root_id: root_id.to_string(),
                        expanded: expand,
                        score_failed: failed,
                    },
                    entry.breadcrumbs.clone(),
                );
                expand
            };

            debug!(
                node_id = %entry.node.id,
                depth = entry.depth,
                score = score,
                parent_score = entry.inherited,
                expand = expand,
                "Scored node"
            );

            if expand {
                let children = self
                    .admit_children(
                        &entry.node.id,
                        &entry.node.title,
                        entry.depth,
                        score,
                        &entry.breadcrumbs,
                    )
                    .await?;
                queue.extend(children);
            }
        }
        Ok(true)
    }

    /// Children not yet visited, marked visited before they are queued.
    async fn admit_children(
        &self,
        parent_id: &str,
        parent_title: &str,
        depth: usize,
        score: f32,
        breadcrumbs: &[String],
    ) -> Result<VecDeque<Frontier>> {
        let children = match self.store.get_children(parent_id).await {
            Ok(children) => children,
            Err(e) => {
                self.stop.cancel();
                return Err(e);
            }
        };

        let mut path = breadcrumbs.to_vec();
        path.push(parent_title.to_string());

        let mut state = self.state.lock().await;
        Ok(children
            .into_iter()
            .filter(|child| state.visit(&child.id))
            .map(|node| Frontier {
                node,
                depth: depth + 1,
                inherited: score,
                breadcrumbs: path.clone(),
            })
            .collect())
    }

    /// Score one node. Exhausted retries yield a flagged zero.
    async fn score(&self, entry: &Frontier) -> Result<(f32, bool)> {
        let context = ScoringContext {
            node_id: entry.node.id.clone(),
            title: entry.node.title.clone(),
            summary: entry.node.summary.clone(),
            level: entry.node.level,
            breadcrumbs: entry.breadcrumbs.clone(),
        };

        let ai = self.ai;
        let subject = self.subject;
        let context = &context;
        let outcome = call_with_retry(Service::Scoring, self.policy, &self.stop, move || async move {
            coerce_score(ai.score_relevance(subject, context).await?)
        })
        .await;

        let mut state = self.state.lock().await;
        match outcome {
            Ok(score) => {
                state.consecutive_failures = 0;
                Ok((score, false))
            }
            Err(ExtractionError::Cancelled) => Err(ExtractionError::Cancelled),
            Err(e) if e.is_unavailable() => {
                let failures = state.consecutive_failures + 1;
                Err(self.abort(&mut state, failures, &e))
            }
            Err(e) => {
                state.consecutive_failures += 1;
                let failures = state.consecutive_failures;
                if failures >= self.config.abort_after_consecutive_failures.max(1) {
                    return Err(self.abort(&mut state, failures, &e));
                }
                warn!(
                    node_id = %entry.node.id,
                    error = %e,
                    "Scoring failed after retries, recording zero score"
                );
                Ok((0.0, true))
            }
        }
    }

    fn abort(&self, state: &mut TraversalState, failures: usize, cause: &ExtractionError) -> ExtractionError {
        error!(
            run_id = %self.run_id,
            failures = failures,
            error = %cause,
            "Scoring service unavailable, aborting traversal"
        );
        state.aborted.get_or_insert(failures);
        self.stop.cancel();
        ExtractionError::ScoringUnavailable { failures }
    }
}

/// Traverse the graph from retrieval candidates.
pub async fn traverse<S, A>(
    store: &S,
    ai: &A,
    subject: &str,
    candidates: &[CandidateResult],
    config: &TraversalConfig,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<TraversalOutcome>
where
    S: GraphStore + ?Sized,
    A: AI + ?Sized,
{
    let traverser = Traverser::new(store, ai, subject, config, policy, cancel);
    info!(run_id = %traverser.run_id(), candidates = candidates.len(), "Starting traversal");

    let roots = traverser.anchor(candidates).await?;
    traverser.walk_roots(roots).await?;
    traverser.widen().await?;
    Ok(traverser.finish().await)
}
