//! Three-axis quality scores and the total parser for judge output.
//!
//! The judge is asked for bare JSON, but models wrap replies in code fences,
//! prepend prose, or return garbage. [`QualityScore::parse`] therefore never
//! fails: any unparseable reply collapses to the neutral default so a
//! malformed judge response can never block the pipeline.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::text::preview;

/// Neutral default for each axis when judge output cannot be parsed.
const DEFAULT_AXIS: u8 = 3;

/// A judge rating of one analysis on three axes, each in `[1, 5]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Does the analysis go beyond the obvious?
    pub depth: u8,
    /// Is it grounded in the actual dream content?
    pub relevance: u8,
    /// Does it offer something the dreamer couldn't see themselves?
    pub insight: u8,
}

/// Judge reply shape. All three keys are required — a reply missing any of
/// them is treated as unparseable, not padded.
#[derive(Deserialize)]
struct RawScores {
    depth: i64,
    relevance: i64,
    insight: i64,
}

impl Default for QualityScore {
    fn default() -> Self {
        Self {
            depth: DEFAULT_AXIS,
            relevance: DEFAULT_AXIS,
            insight: DEFAULT_AXIS,
        }
    }
}

impl QualityScore {
    /// Parse a raw judge reply. Total: always returns a valid score.
    ///
    /// Strips a surrounding code fence (with optional `json` language tag)
    /// before parsing. Out-of-range axes are clamped into `[1, 5]`. Malformed
    /// JSON, missing keys, or non-integer values yield [`QualityScore::default`]
    /// and a warning.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let cleaned = strip_fence(raw);
        match serde_json::from_str::<RawScores>(cleaned) {
            Ok(scores) => Self {
                depth: clamp_axis(scores.depth),
                relevance: clamp_axis(scores.relevance),
                insight: clamp_axis(scores.insight),
            },
            Err(error) => {
                warn!(%error, raw = %preview(raw, 120), "unparseable judge reply, using neutral score");
                Self::default()
            }
        }
    }

    /// Arithmetic mean of the three axes, rounded half away from zero.
    #[must_use]
    pub fn average(self) -> u8 {
        let sum = u32::from(self.depth) + u32::from(self.relevance) + u32::from(self.insight);
        (f64::from(sum) / 3.0).round() as u8
    }
}

fn clamp_axis(value: i64) -> u8 {
    value.clamp(1, 5) as u8
}

/// Strip a surrounding triple-backtick fence and optional `json` tag.
///
/// Returns the fenced body when a fence is present, the trimmed input
/// otherwise. A dangling opening fence with no closer still yields the body.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.contains("```") {
        return trimmed;
    }
    trimmed
        .split("```")
        .nth(1)
        .map_or(trimmed, |inner| inner.trim_start_matches("json").trim())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
