//! Parsing of raw model replies into scores and extracted items.
//!
//! Helpers for `AI` implementations that talk to text-completion models.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ExtractionError, Result, Service};
use crate::types::extraction::ExtractedItem;

/// Clamp a finite score into [0,1]; NaN and infinities are malformed.
pub fn coerce_score(raw: f32) -> Result<f32> {
    if !raw.is_finite() {
        return Err(ExtractionError::malformed(
            Service::Scoring,
            format!("score {raw} is not a finite number"),
        ));
    }
    Ok(raw.clamp(0.0, 1.0))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern"))
}

fn labelled_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:score|relevance)\b[^:\n]*:\s*(-?\d+(?:\.\d+)?)").expect("label pattern")
    })
}

/// Score in a text reply, clamped into [0,1].
///
/// A number after a "score:" or "relevance:" label wins, so a restated
/// scale is skipped: "Score (0-1): 0.85" → 0.85. Otherwise the first
/// number: "0.85 out of 1" → 0.85, "1.4" → 1.0. A reply without a number
/// is malformed.
pub fn parse_score(reply: &str) -> Result<f32> {
    let raw = labelled_re()
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .or_else(|| number_re().find(reply))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .ok_or_else(|| {
            ExtractionError::malformed(Service::Scoring, format!("no number in reply: {reply:?}"))
        })?;
    coerce_score(raw)
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Object form of an extraction reply.
#[derive(Debug, Deserialize)]
struct ItemsResponse {
    items: Vec<serde_json::Value>,
}

/// Parse an extraction reply into items.
///
/// Accepts a JSON array or an object with an `items` array, optionally
/// wrapped in a code fence. Plain strings become text items.
pub fn parse_extraction_response(reply: &str) -> Result<Vec<ExtractedItem>> {
    let json = strip_code_fence(reply);

    // Try parsing as array first (common format)
    if let Ok(records) = serde_json::from_str::<Vec<serde_json::Value>>(json) {
        return Ok(records.into_iter().map(ExtractedItem::from_record).collect());
    }

    let response: ItemsResponse = serde_json::from_str(json).map_err(|e| {
        ExtractionError::malformed(Service::Extraction, format!("unparseable items: {e}"))
    })?;
    Ok(response
        .items
        .into_iter()
        .map(ExtractedItem::from_record)
        .collect())
}
