//! Known-model catalog and the escalation ladder.
//!
//! The table is ordered weakest to strongest. That ordering is load-bearing:
//! the quality retry re-runs a low-scoring specialist on the next entry up,
//! and a run already on the strongest model has nowhere to escalate.

/// One catalog entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Human-facing label.
    pub label: &'static str,
    /// Backend model identifier.
    pub id: &'static str,
}

/// Known models, weakest first. Doubles as the escalation ladder.
pub const MODEL_LADDER: [ModelInfo; 5] = [
    ModelInfo {
        label: "Qwen 2.5 7B",
        id: "qwen2.5:7b",
    },
    ModelInfo {
        label: "Llama 3.1 8B",
        id: "llama3.1:8b",
    },
    ModelInfo {
        label: "Qwen 2.5 14B",
        id: "qwen2.5:14b",
    },
    ModelInfo {
        label: "Qwen 2.5 32B",
        id: "qwen2.5:32b",
    },
    ModelInfo {
        label: "Llama 3.3 70B",
        id: "llama3.3:70b",
    },
];

/// Default model for new runs.
pub const DEFAULT_MODEL: &str = "qwen2.5:7b";

/// Look up a catalog entry by backend identifier.
#[must_use]
pub fn get_model(id: &str) -> Option<&'static ModelInfo> {
    MODEL_LADDER.iter().find(|m| m.id == id)
}

/// The next-stronger model, if any.
///
/// Returns `None` for the strongest model and for identifiers not in the
/// catalog — in both cases there is nothing safe to escalate to.
#[must_use]
pub fn escalate(id: &str) -> Option<&'static str> {
    let position = MODEL_LADDER.iter().position(|m| m.id == id)?;
    MODEL_LADDER.get(position + 1).map(|m| m.id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
