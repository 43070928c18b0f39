//! Optional post-pass dropping near-duplicate extracted items.
//!
//! The memory digest only discourages the extraction service from
//! restating earlier items. This pass enforces it on the node result.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::types::extraction::ExtractedItem;

/// Lowercase alphanumeric words joined by single spaces.
///
/// Punctuation separates words, so "follow-up" and "follow up" normalize
/// alike.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 of the normalized text, hex encoded.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Jaccard similarity of two word sets.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}

/// Drop items that repeat an earlier one.
///
/// An item is a duplicate if its fingerprint was already seen or its word
/// set reaches `similarity` Jaccard with a kept item. The first occurrence
/// wins. Returns the kept items and the number dropped.
pub fn dedup_items(items: Vec<ExtractedItem>, similarity: f32) -> (Vec<ExtractedItem>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept_words: Vec<HashSet<String>> = Vec::new();
    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = 0;

    for item in items {
        let normalized = normalize(&item.digest);
        let words: HashSet<String> = normalized
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let duplicate = !seen.insert(fingerprint(&item.digest))
            || kept_words.iter().any(|k| jaccard(k, &words) >= similarity);
        if duplicate {
            dropped += 1;
            continue;
        }

        kept_words.push(words);
        kept.push(item);
    }

    (kept, dropped)
}
