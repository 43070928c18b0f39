//! Keyword generation for lexical retrieval.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::error::{ExtractionError, Result};
use crate::types::config::RetrievalConfig;

/// Split a subject into lowercase terms.
///
/// Terms are runs of alphanumerics; inner hyphens and apostrophes stay
/// part of the word ("follow-up", "patient's").
pub fn tokenize(subject: &str) -> Vec<String> {
    subject
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|t| t.trim_matches(|c: char| c == '-' || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Significant keywords of a subject.
///
/// Keeps terms with at least `min_keyword_length` characters that are not
/// stop words, deduplicated in first-occurrence order. If that leaves
/// nothing, falls back to every non-stop-word term of two or more
/// characters, then to every term of two or more characters.
pub fn extract_keywords(subject: &str, config: &RetrievalConfig) -> Vec<String> {
    let stop_words: HashSet<&str> = config.stop_words.iter().map(|w| w.as_str()).collect();
    let terms = tokenize(subject);

    let pick = |keep: &dyn Fn(&str) -> bool| -> Vec<String> {
        let mut seen = HashSet::new();
        terms
            .iter()
            .filter(|t| keep(t))
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    };

    let keywords = pick(&|t| {
        t.chars().count() >= config.min_keyword_length && !stop_words.contains(t)
    });
    if !keywords.is_empty() {
        return keywords;
    }

    let relaxed = pick(&|t| t.chars().count() >= 2 && !stop_words.contains(t));
    if !relaxed.is_empty() {
        return relaxed;
    }

    pick(&|t| t.chars().count() >= 2)
}

/// Case-insensitive alternation matching any keyword as a substring.
pub fn keyword_pattern(keywords: &[String]) -> Result<Regex> {
    if keywords.is_empty() {
        return Err(ExtractionError::InvalidQuery {
            reason: "subject has no usable keywords".into(),
        });
    }

    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");

    RegexBuilder::new(&format!("(?:{alternation})"))
        .case_insensitive(true)
        .build()
        .map_err(|e| ExtractionError::InvalidQuery {
            reason: format!("keyword pattern: {e}"),
        })
}

/// Number of distinct keywords found in `text` (case-insensitive).
pub fn keyword_hits(keywords: &[String], text: &str) -> usize {
    let text_lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| text_lower.contains(k.as_str()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_excluded() {
        let config = RetrievalConfig::default();
        let keywords = extract_keywords("Identify the triage categories and criteria", &config);

        assert_eq!(keywords, vec!["triage", "categories", "criteria"]);
        assert!(!keywords.iter().any(|k| k == "identify"));
    }

    #[test]
    fn test_min_length_and_dedup() {
        let config = RetrievalConfig {
            min_keyword_length: 4,
            ..RetrievalConfig::default()
        };
        let keywords = extract_keywords("ICU bed ICU staffing staffing", &config);
        assert_eq!(keywords, vec!["staffing"]);
    }

    #[test]
    fn test_fallback_when_everything_filtered() {
        let config = RetrievalConfig::default();
        assert_eq!(extract_keywords("list ER", &config), vec!["er"]);
        assert_eq!(extract_keywords("what is it", &config), vec!["what", "is", "it"]);
        assert!(extract_keywords("?!", &config).is_empty());
    }

    #[test]
    fn test_tokenize_keeps_hyphenated_words() {
        assert_eq!(
            tokenize("Follow-up care, 'post-op' (day 2)"),
            vec!["follow-up", "care", "post-op", "day", "2"]
        );
    }

    #[test]
    fn test_keyword_pattern_is_case_insensitive_and_escaped() {
        let pattern = keyword_pattern(&["triage".to_string(), "c++".to_string()]).unwrap();
        assert!(pattern.is_match("TRIAGE Categories"));
        assert!(pattern.is_match("uses C++ tooling"));
        assert!(!pattern.is_match("staffing"));

        assert!(keyword_pattern(&[]).is_err());
    }

    #[test]
    fn test_keyword_hits() {
        let keywords = vec!["triage".to_string(), "criteria".to_string()];
        assert_eq!(keyword_hits(&keywords, "Triage criteria for adults"), 2);
        assert_eq!(keyword_hits(&keywords, "Staffing"), 0);
    }
}
