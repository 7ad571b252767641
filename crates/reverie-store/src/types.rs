//! Row types crossing the gateway boundary.

use serde::Serialize;

use reverie_core::role::{AgentKind, Role};

/// A recorded dream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubjectRow {
    /// Row id.
    pub id: i64,
    /// The dream text.
    pub content: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// One persisted agent output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnalysisRow {
    /// Row id.
    pub id: i64,
    /// The dream this analyzes.
    pub subject_id: i64,
    /// Which stage produced it.
    pub role: Role,
    /// Coarse agent kind, denormalized for external queries.
    pub agent_kind: AgentKind,
    /// Model that produced the text.
    pub model: String,
    /// Full output text.
    pub content: String,
    /// Judge average, set only on specialist rows and only after rating.
    pub score: Option<u8>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Payload for creating an analysis row. The text is complete at creation —
/// there are no partial-text rows.
#[derive(Clone, Copy, Debug)]
pub struct NewAnalysis<'a> {
    /// The dream this analyzes.
    pub subject_id: i64,
    /// Producing stage.
    pub role: Role,
    /// Model that produced the text.
    pub model: &'a str,
    /// Full output text.
    pub content: &'a str,
}
