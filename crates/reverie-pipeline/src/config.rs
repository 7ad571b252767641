//! Pipeline tuning knobs.

use std::time::Duration;

/// Orchestrator configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Rounded-average scores below this make a specialist retry-eligible.
    pub quality_threshold: u8,
    /// Trigger the quality retry automatically after rating. When off, the
    /// retry hook is still available for manual invocation.
    pub auto_retry: bool,
    /// Upper bound on a single agent invocation. Generation is slow; this
    /// is measured in minutes, and expiry is a stage failure, not an empty
    /// result.
    pub stage_timeout: Duration,
    /// Bound of the fan-in event channel. A slow consumer blocks producers
    /// at this depth rather than dropping fragments.
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 3,
            auto_retry: false,
            stage_timeout: Duration::from_secs(300),
            channel_capacity: 64,
        }
    }
}
