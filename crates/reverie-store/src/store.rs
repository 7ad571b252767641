//! The gateway trait.

use crate::errors::StoreError;
use crate::types::{AnalysisRow, NewAnalysis, SubjectRow};

/// Durable record-keeping for subjects and their analyses.
///
/// The only shared mutable resource in the system. Stage code owns its own
/// create/update calls; no two stages touch the same row's score, and a
/// row's score update happens only after its create has returned an id.
pub trait AnalysisStore: Send + Sync {
    /// Record a new dream.
    fn create_subject(&self, content: &str) -> Result<SubjectRow, StoreError>;

    /// Fetch a dream by id.
    fn get_subject(&self, subject_id: i64) -> Result<Option<SubjectRow>, StoreError>;

    /// All dreams, newest first.
    fn list_subjects(&self) -> Result<Vec<SubjectRow>, StoreError>;

    /// Persist one agent output. Returns the new row id.
    fn create_analysis(&self, new: &NewAnalysis<'_>) -> Result<i64, StoreError>;

    /// Attach a judge score to an existing analysis row.
    fn update_score(&self, analysis_id: i64, score: u8) -> Result<(), StoreError>;

    /// All analyses for a dream, in creation order.
    fn list_for_subject(&self, subject_id: i64) -> Result<Vec<AnalysisRow>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared contract exercises — run against every backend
// ─────────────────────────────────────────────────────────────────────────────
