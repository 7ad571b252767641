//! The request and state records threaded through the pipeline.

use std::collections::{HashMap, HashSet};

use reverie_core::role::Role;

/// One pipeline invocation, immutable for the run's duration.
#[derive(Clone, Debug)]
pub struct AnalysisRequest {
    /// The persisted dream this run analyzes.
    pub subject_id: i64,
    /// The dream text.
    pub source: String,
    /// Model every stage runs on (the retry path may escalate past it).
    pub model: String,
    /// Pre-supplied first-pass output. When present, the generalist stage
    /// is skipped — the caller already ran and persisted it, typically over
    /// a separate streaming channel.
    pub first_pass: Option<String>,
}

impl AnalysisRequest {
    /// A fresh request with no pre-supplied first pass.
    #[must_use]
    pub fn new(subject_id: i64, source: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            subject_id,
            source: source.into(),
            model: model.into(),
            first_pass: None,
        }
    }

    /// Resume past the generalist with an already-produced first pass.
    #[must_use]
    pub fn with_first_pass(mut self, text: impl Into<String>) -> Self {
        self.first_pass = Some(text.into());
        self
    }
}

/// Mutable state threaded through every stage of one run.
///
/// Output slots are written once by their stage; only the bounded retry
/// path may overwrite a specialist slot, and it clears that role's score
/// entry before re-scoring. The `retried` set only ever grows.
#[derive(Clone, Debug)]
pub struct PipelineState {
    /// The persisted dream under analysis.
    pub subject_id: i64,
    /// The dream text.
    pub source: String,
    /// Model for this run.
    pub model: String,
    /// First-pass output.
    pub generalist: String,
    /// Symbol specialist output.
    pub symbol: String,
    /// Emotion specialist output.
    pub emotion: String,
    /// Theme specialist output.
    pub theme: String,
    /// Final synthesis.
    pub synthesis: String,
    /// Persisted row id per role, needed to attach scores after the fact.
    pub analysis_ids: HashMap<Role, i64>,
    /// Rounded judge average per specialist.
    pub scores: HashMap<Role, u8>,
    /// Specialists already retried this run. Grows, never shrinks.
    pub retried: HashSet<Role>,
}

impl PipelineState {
    /// Initial state for a request. A pre-supplied first pass lands in the
    /// generalist slot, which the entry guard reads.
    #[must_use]
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            subject_id: request.subject_id,
            source: request.source,
            model: request.model,
            generalist: request.first_pass.unwrap_or_default(),
            symbol: String::new(),
            emotion: String::new(),
            theme: String::new(),
            synthesis: String::new(),
            analysis_ids: HashMap::new(),
            scores: HashMap::new(),
            retried: HashSet::new(),
        }
    }

    /// The output slot for an analysis role. Empty until its stage ran.
    #[must_use]
    pub fn output(&self, role: Role) -> &str {
        match role {
            Role::Generalist => &self.generalist,
            Role::Symbol => &self.symbol,
            Role::Emotion => &self.emotion,
            Role::Theme => &self.theme,
            Role::Synthesizer => &self.synthesis,
            Role::Judge => "",
        }
    }

    /// Write an output slot. The judge has no slot; writes to it are
    /// ignored.
    pub fn set_output(&mut self, role: Role, text: String) {
        match role {
            Role::Generalist => self.generalist = text,
            Role::Symbol => self.symbol = text,
            Role::Emotion => self.emotion = text,
            Role::Theme => self.theme = text,
            Role::Synthesizer => self.synthesis = text,
            Role::Judge => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_request_leaves_generalist_empty() {
        let state = PipelineState::new(AnalysisRequest::new(1, "a dream", "m"));
        assert!(state.generalist.is_empty());
        assert!(state.scores.is_empty());
        assert!(state.retried.is_empty());
    }

    #[test]
    fn pre_supplied_first_pass_fills_the_slot() {
        let request = AnalysisRequest::new(1, "a dream", "m").with_first_pass("already analyzed");
        let state = PipelineState::new(request);
        assert_eq!(state.generalist, "already analyzed");
    }

    #[test]
    fn output_slots_round_trip() {
        let mut state = PipelineState::new(AnalysisRequest::new(1, "d", "m"));
        for role in [
            Role::Generalist,
            Role::Symbol,
            Role::Emotion,
            Role::Theme,
            Role::Synthesizer,
        ] {
            state.set_output(role, format!("{role} text"));
            assert_eq!(state.output(role), format!("{role} text"));
        }
    }

    #[test]
    fn judge_has_no_slot() {
        let mut state = PipelineState::new(AnalysisRequest::new(1, "d", "m"));
        state.set_output(Role::Judge, "dropped".into());
        assert_eq!(state.output(Role::Judge), "");
    }
}
