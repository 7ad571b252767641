//! Store error hierarchy.

/// Errors surfaced by an [`crate::AnalysisStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A score update targeted an analysis id that does not exist.
    #[error("analysis {0} not found")]
    AnalysisNotFound(i64),

    /// A persisted role tag could not be parsed back. Indicates writes from
    /// a foreign or newer schema.
    #[error("invalid role tag {0:?}")]
    InvalidRole(String),
}
