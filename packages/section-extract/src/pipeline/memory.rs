//! Bounded memory digest carried between the segments of one node.

use crate::types::config::ExtractionConfig;
use crate::types::extraction::ExtractedItem;

/// Truncate to `max` characters, marking the cut with "...".
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= 3 {
        return text.chars().take(max).collect();
    }
    let mut cut: String = text.chars().take(max - 3).collect();
    cut.push_str("...");
    cut
}

fn elision_marker(remaining: usize) -> String {
    format!("[... {remaining} more items already extracted]")
}

/// Render digest lines under a character budget.
///
/// Lines are `"{n}. {digest}"`, each capped at `max_item_chars`. As many
/// lines as fit are kept in order; the rest are replaced by an elision
/// marker so truncation is always visible. The result exceeds `max_chars`
/// only when the marker alone does.
pub fn build_digest(digests: &[String], max_chars: usize, max_item_chars: usize) -> String {
    let lines: Vec<String> = digests
        .iter()
        .enumerate()
        .map(|(i, d)| format!("{}. {}", i + 1, truncate_chars(d, max_item_chars)))
        .collect();

    // Length of the first m lines joined by newlines
    let mut prefix = vec![0usize; lines.len() + 1];
    for (i, line) in lines.iter().enumerate() {
        let sep = usize::from(i > 0);
        prefix[i + 1] = prefix[i] + sep + line.chars().count();
    }

    let total = lines.len();
    let kept = (0..=total)
        .rev()
        .find(|&m| {
            let elided = total - m;
            let marker = if elided == 0 {
                0
            } else {
                usize::from(m > 0) + elision_marker(elided).chars().count()
            };
            prefix[m] + marker <= max_chars
        })
        .unwrap_or(0);

    let mut digest = lines[..kept].join("\n");
    if kept < total {
        if !digest.is_empty() {
            digest.push('\n');
        }
        digest.push_str(&elision_marker(total - kept));
    }
    digest
}

/// Items extracted so far from one node, rendered as a bounded digest.
#[derive(Debug, Clone)]
pub struct ExtractionMemory {
    max_chars: usize,
    max_item_chars: usize,
    digests: Vec<String>,
    rendered: String,
}

impl ExtractionMemory {
    /// Create an empty memory.
    pub fn new(max_chars: usize, max_item_chars: usize) -> Self {
        Self {
            max_chars,
            max_item_chars,
            digests: Vec::new(),
            rendered: String::new(),
        }
    }

    /// Create an empty memory with the configured limits.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.max_digest_chars, config.max_item_chars)
    }

    /// Append a segment's items and regenerate the digest.
    pub fn push(&mut self, items: &[ExtractedItem]) {
        if items.is_empty() {
            return;
        }
        self.digests
            .extend(items.iter().map(|item| item.digest.clone()));
        self.rendered = build_digest(&self.digests, self.max_chars, self.max_item_chars);
    }

    /// The digest to pass to the next call, `None` while empty.
    pub fn digest(&self) -> Option<&str> {
        if self.rendered.is_empty() {
            None
        } else {
            Some(&self.rendered)
        }
    }

    /// Number of remembered items.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}
