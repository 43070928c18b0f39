//! Configuration types for retrieval, traversal, segmentation and extraction.
//!
//! Every operation takes its thresholds and budgets as explicit parameters;
//! nothing here is global state. `PipelineConfig` bundles the sections for
//! the [`Pipeline`](crate::Pipeline) entry point.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, Result};
use crate::types::candidate::RetrievalMode;

/// Words that never become lexical keywords.
///
/// Function words plus the task verbs subjects usually start with.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "being",
    "between", "by", "can", "define", "describe", "detail", "determine", "does", "each",
    "explain", "find", "for", "from", "give", "has", "have", "how", "identify", "in",
    "include", "including", "into", "is", "it", "its", "list", "of", "on", "or",
    "outline", "over", "provide", "show", "should", "summarize", "that", "the", "their",
    "them", "these", "this", "those", "to", "under", "was", "were", "what", "when",
    "where", "which", "who", "why", "with",
];

/// Retry and timeout policy for one kind of service call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (>= 1)
    pub max_attempts: usize,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Growth factor applied after each retry
    pub multiplier: f64,

    /// Upper bound for a single delay
    pub max_backoff_ms: u64,

    /// Per-call timeout, independent of total run time
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 5_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the number of attempts.
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial backoff.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ExtractionError::Config(
                "retry max_attempts must be at least 1".into(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ExtractionError::Config(
                "retry call_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the retrieval coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Strategy used by `Pipeline::run`
    pub mode: RetrievalMode,

    /// Shortest term kept as a keyword
    pub min_keyword_length: usize,

    /// Terms never used as keywords (lowercase)
    pub stop_words: Vec<String>,

    /// Candidates returned in lexical mode
    pub top_k_lexical: usize,

    /// Candidates returned in semantic mode
    pub top_k_semantic: usize,

    /// Candidates returned in hybrid mode
    pub top_k_hybrid: usize,

    /// Flat score given to every lexical hit.
    ///
    /// Kept below typical strong cosine scores so lexical noise does not
    /// outrank a good semantic match.
    pub lexical_score: f32,

    /// Maximum rows requested from the graph store's pattern match
    pub lexical_scan_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Hybrid,
            min_keyword_length: 3,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            top_k_lexical: 20,
            top_k_semantic: 10,
            top_k_hybrid: 15,
            lexical_score: 0.5,
            lexical_scan_limit: 200,
        }
    }
}

impl RetrievalConfig {
    /// `top_k` for a mode.
    pub fn top_k(&self, mode: RetrievalMode) -> usize {
        match mode {
            RetrievalMode::Lexical => self.top_k_lexical,
            RetrievalMode::Semantic => self.top_k_semantic,
            RetrievalMode::Hybrid => self.top_k_hybrid,
        }
    }

    /// Set the retrieval mode.
    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the same `top_k` for every mode.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k_lexical = top_k;
        self.top_k_semantic = top_k;
        self.top_k_hybrid = top_k;
        self
    }

    /// Replace the stop-word set.
    pub fn with_stop_words(mut self, words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop_words = words
            .into_iter()
            .map(|w| w.into().to_lowercase())
            .collect();
        self
    }

    /// Set the lexical placeholder score.
    pub fn with_lexical_score(mut self, score: f32) -> Self {
        self.lexical_score = score;
        self
    }
}

/// Configuration for the traversal scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalConfig {
    /// Deepest level explored below a root (0 = roots only)
    pub max_depth: usize,

    /// Children are expanded only at or above this score
    pub threshold: f32,

    /// Accepted nodes wanted before the recall safety valve kicks in
    pub min_results: usize,

    /// Levels climbed from a candidate to its anchor
    pub anchor_levels: usize,

    /// Threshold decrement per widening round
    pub threshold_step: f32,

    /// Widening never lowers the threshold below this
    pub min_threshold: f32,

    /// Upper bound on threshold-widening rounds
    pub max_widening_rounds: usize,

    /// Factor applied to `top_k` when the pipeline re-retrieves candidates
    pub candidate_growth: usize,

    /// Roots walked concurrently
    pub concurrency: usize,

    /// Exhausted scoring calls in a row before the run aborts
    pub abort_after_consecutive_failures: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            threshold: 0.7,
            min_results: 3,
            anchor_levels: 1,
            threshold_step: 0.1,
            min_threshold: 0.3,
            max_widening_rounds: 3,
            candidate_growth: 2,
            concurrency: 4,
            abort_after_consecutive_failures: 5,
        }
    }
}

impl TraversalConfig {
    /// Set max depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the relevance threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the minimum-result floor.
    pub fn with_min_results(mut self, min: usize) -> Self {
        self.min_results = min;
        self
    }

    /// Set the anchor climb.
    pub fn with_anchor_levels(mut self, levels: usize) -> Self {
        self.anchor_levels = levels;
        self
    }

    /// Set the root concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ExtractionError::Config(format!(
                "threshold {} outside [0,1]",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_threshold) || self.min_threshold > self.threshold {
            return Err(ExtractionError::Config(format!(
                "min_threshold {} must be within [0, threshold]",
                self.min_threshold
            )));
        }
        if self.concurrency == 0 {
            return Err(ExtractionError::Config(
                "traversal concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the structure-aware segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Token budget per segment
    pub max_tokens: usize,

    /// Characters counted as one token by the estimator
    pub chars_per_token: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1_500,
            chars_per_token: 4,
        }
    }
}

impl SegmentConfig {
    /// Create a config with a token budget.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Self::default()
        }
    }

    /// Estimated token count of a text (ceil(chars / chars_per_token)).
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let per_token = self.chars_per_token.max(1);
        let chars = text.chars().count();
        chars.div_ceil(per_token)
    }
}

/// Configuration for the extraction orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Content at or under this estimate is extracted in one call
    pub single_call_budget: usize,

    /// Segmentation of oversized content
    pub segment: SegmentConfig,

    /// Hard cap on the memory digest length (characters)
    pub max_digest_chars: usize,

    /// Cap per digest line (characters)
    pub max_item_chars: usize,

    /// Drop near-duplicate items after extraction
    pub dedup_items: bool,

    /// Word-set Jaccard similarity at which two items count as duplicates
    pub dedup_similarity: f32,

    /// Nodes extracted concurrently by the pipeline
    pub concurrency: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            single_call_budget: 3_000,
            segment: SegmentConfig::default(),
            max_digest_chars: 2_000,
            max_item_chars: 160,
            dedup_items: false,
            dedup_similarity: 0.9,
            concurrency: 4,
        }
    }
}

impl ExtractionConfig {
    /// Set the single-call budget.
    pub fn with_single_call_budget(mut self, tokens: usize) -> Self {
        self.single_call_budget = tokens;
        self
    }

    /// Set the segment budget.
    pub fn with_segment_tokens(mut self, tokens: usize) -> Self {
        self.segment.max_tokens = tokens;
        self
    }

    /// Set the digest cap.
    pub fn with_max_digest_chars(mut self, chars: usize) -> Self {
        self.max_digest_chars = chars;
        self
    }

    /// Enable the dedup post-pass.
    pub fn with_dedup(mut self, similarity: f32) -> Self {
        self.dedup_items = true;
        self.dedup_similarity = similarity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.segment.max_tokens == 0 {
            return Err(ExtractionError::Config(
                "segment max_tokens must be positive".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ExtractionError::Config(
                "extraction concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults overridden by `SECTION_EXTRACT_*` environment variables.
    ///
    /// A `.env` file is read first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load defaults overridden by values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mode) = parse_var::<RetrievalMode>(&lookup, "SECTION_EXTRACT_RETRIEVAL_MODE")? {
            config.retrieval.mode = mode;
        }
        if let Some(top_k) = parse_var::<usize>(&lookup, "SECTION_EXTRACT_TOP_K")? {
            config.retrieval = config.retrieval.with_top_k(top_k);
        }
        if let Some(len) = parse_var(&lookup, "SECTION_EXTRACT_MIN_KEYWORD_LENGTH")? {
            config.retrieval.min_keyword_length = len;
        }
        if let Some(score) = parse_var(&lookup, "SECTION_EXTRACT_LEXICAL_SCORE")? {
            config.retrieval.lexical_score = score;
        }
        if let Some(depth) = parse_var(&lookup, "SECTION_EXTRACT_MAX_DEPTH")? {
            config.traversal.max_depth = depth;
        }
        if let Some(threshold) = parse_var(&lookup, "SECTION_EXTRACT_THRESHOLD")? {
            config.traversal.threshold = threshold;
        }
        if let Some(min) = parse_var(&lookup, "SECTION_EXTRACT_MIN_RESULTS")? {
            config.traversal.min_results = min;
        }
        if let Some(tokens) = parse_var(&lookup, "SECTION_EXTRACT_SEGMENT_TOKENS")? {
            config.extraction.segment.max_tokens = tokens;
        }
        if let Some(tokens) = parse_var(&lookup, "SECTION_EXTRACT_SINGLE_CALL_TOKENS")? {
            config.extraction.single_call_budget = tokens;
        }
        if let Some(chars) = parse_var(&lookup, "SECTION_EXTRACT_MAX_DIGEST_CHARS")? {
            config.extraction.max_digest_chars = chars;
        }
        if let Some(attempts) = parse_var(&lookup, "SECTION_EXTRACT_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var(&lookup, "SECTION_EXTRACT_CALL_TIMEOUT_MS")? {
            config.retry.call_timeout_ms = ms;
        }
        if let Some(concurrency) = parse_var::<usize>(&lookup, "SECTION_EXTRACT_CONCURRENCY")? {
            config.traversal.concurrency = concurrency;
            config.extraction.concurrency = concurrency;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        self.traversal.validate()?;
        self.extraction.validate()?;
        self.retry.validate()?;
        if !(0.0..=1.0).contains(&self.retrieval.lexical_score) {
            return Err(ExtractionError::Config(format!(
                "lexical_score {} outside [0,1]",
                self.retrieval.lexical_score
            )));
        }
        Ok(())
    }

    /// Set the retrieval section.
    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Set the traversal section.
    pub fn with_traversal(mut self, traversal: TraversalConfig) -> Self {
        self.traversal = traversal;
        self
    }

    /// Set the extraction section.
    pub fn with_extraction(mut self, extraction: ExtractionConfig) -> Self {
        self.extraction = extraction;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ExtractionError::Config(format!("{key} has invalid value {raw:?}"))),
    }
}

impl FromStr for RetrievalMode {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lexical" => Ok(Self::Lexical),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(ExtractionError::Config(format!(
                "unknown retrieval mode: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 350,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        let config = SegmentConfig::default();
        assert_eq!(config.estimate_tokens(""), 0);
        assert_eq!(config.estimate_tokens("abcd"), 1);
        assert_eq!(config.estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SECTION_EXTRACT_RETRIEVAL_MODE", "semantic"),
            ("SECTION_EXTRACT_THRESHOLD", "0.6"),
            ("SECTION_EXTRACT_TOP_K", "7"),
            ("SECTION_EXTRACT_CONCURRENCY", "2"),
        ]
        .into_iter()
        .collect();

        let config =
            PipelineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.retrieval.mode, RetrievalMode::Semantic);
        assert!((config.traversal.threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.top_k(RetrievalMode::Lexical), 7);
        assert_eq!(config.extraction.concurrency, 2);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = PipelineConfig::from_lookup(|k| {
            (k == "SECTION_EXTRACT_MAX_DEPTH").then(|| "deep".to_string())
        });
        assert!(matches!(result, Err(ExtractionError::Config(_))));
    }

    #[test]
    fn test_validate_threshold_range() {
        let config = PipelineConfig::new()
            .with_traversal(TraversalConfig::default().with_threshold(1.5));
        assert!(config.validate().is_err());
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
