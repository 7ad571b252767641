//! Pipeline streaming events.
//!
//! One event family: [`PipelineEvent`], the ordered fan-in contract between
//! the orchestrator and its streaming consumers. Producer fragments arrive
//! role-tagged; lifecycle markers (`agent_finished`, `agent_failed`,
//! `scores`, `done`) are orchestrator-sourced. The serialized shape is part
//! of the core contract — the transport layer may pick its own framing
//! (NDJSON, SSE) but must not reshape events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Events emitted on the fan-in channel during a streaming pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// One text fragment from one producer, in true arrival order.
    Fragment {
        /// Producer that emitted the fragment.
        role: Role,
        /// Text fragment, exactly as produced.
        fragment: String,
    },

    /// A producer finished cleanly. Carries its accumulated full text.
    /// Emitted after that producer's last fragment, never before.
    AgentFinished {
        /// Producer that finished.
        role: Role,
        /// Full concatenated output.
        text: String,
    },

    /// A producer failed mid-flight. The channel stays open so the
    /// remaining producers can still finish.
    AgentFailed {
        /// Producer that failed.
        role: Role,
        /// Human-readable failure description.
        error: String,
    },

    /// Rating stage completed: rounded average per specialist role.
    Scores {
        /// Score per rated specialist.
        scores: BTreeMap<Role, u8>,
    },

    /// The whole streaming run completed successfully.
    Done,
}

impl PipelineEvent {
    /// Stable event-type tag, matching the serialized `event` field.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::Fragment { .. } => "fragment",
            PipelineEvent::AgentFinished { .. } => "agent_finished",
            PipelineEvent::AgentFailed { .. } => "agent_failed",
            PipelineEvent::Scores { .. } => "scores",
            PipelineEvent::Done => "done",
        }
    }

    /// The producer role, for role-scoped events.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            PipelineEvent::Fragment { role, .. }
            | PipelineEvent::AgentFinished { role, .. }
            | PipelineEvent::AgentFailed { role, .. } => Some(*role),
            PipelineEvent::Scores { .. } | PipelineEvent::Done => None,
        }
    }

    /// Whether this event ends a producer's stream (finished or failed).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::AgentFinished { .. } | PipelineEvent::AgentFailed { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
