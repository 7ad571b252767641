//! Pipeline error hierarchy.

use reverie_core::role::Role;
use reverie_llm::generator::GenerateError;
use reverie_store::StoreError;

/// Errors that abort a pipeline run.
///
/// Score-parse failures never appear here — the parser is total and
/// degrades to the neutral score. In streaming mode, per-producer failures
/// surface as `agent_failed` events instead of tearing the channel down.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The subject being analyzed does not exist. Raised before any model
    /// call is spent.
    #[error("subject {0} not found")]
    SubjectNotFound(i64),

    /// An agent invocation failed upstream. Not retried — the only retry in
    /// the system is the quality-driven re-analysis.
    #[error("{role} stage failed: {source}")]
    Generation {
        /// Stage that failed.
        role: Role,
        /// Backend failure.
        #[source]
        source: GenerateError,
    },

    /// An agent invocation exceeded the stage timeout.
    #[error("{role} stage timed out")]
    StageTimeout {
        /// Stage that timed out.
        role: Role,
    },

    /// The persistence gateway failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
