//! Role tags for pipeline stages.
//!
//! Every output the pipeline produces is tagged with the [`Role`] that made
//! it. Roles are a closed set — the stage wiring in the orchestrator is a
//! reviewable list, not an open registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which stage of the pipeline produced an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// First-pass analyst. Maps the landscape for the specialists.
    Generalist,
    /// Deep-dive on dream symbols.
    Symbol,
    /// Deep-dive on the emotional landscape.
    Emotion,
    /// Deep-dive on psychological and life themes.
    Theme,
    /// Final interpreter combining all prior outputs.
    Synthesizer,
    /// Scores specialist outputs on depth, relevance, and insight.
    Judge,
}

impl Role {
    /// The three deep-dive specialists, in canonical context order.
    pub const SPECIALISTS: [Role; 3] = [Role::Symbol, Role::Emotion, Role::Theme];

    /// Stable wire name, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Generalist => "generalist",
            Role::Symbol => "symbol",
            Role::Emotion => "emotion",
            Role::Theme => "theme",
            Role::Synthesizer => "synthesizer",
            Role::Judge => "judge",
        }
    }

    /// Parse a wire name back into a role.
    #[must_use]
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "generalist" => Some(Role::Generalist),
            "symbol" => Some(Role::Symbol),
            "emotion" => Some(Role::Emotion),
            "theme" => Some(Role::Theme),
            "synthesizer" => Some(Role::Synthesizer),
            "judge" => Some(Role::Judge),
            _ => None,
        }
    }

    /// Coarse agent kind recorded alongside each persisted analysis.
    #[must_use]
    pub fn kind(self) -> AgentKind {
        match self {
            Role::Generalist => AgentKind::Generalist,
            Role::Symbol | Role::Emotion | Role::Theme => AgentKind::Specialist,
            Role::Synthesizer => AgentKind::Synthesizer,
            Role::Judge => AgentKind::Judge,
        }
    }

    /// Whether this role is one of the three deep-dive specialists.
    #[must_use]
    pub fn is_specialist(self) -> bool {
        Self::SPECIALISTS.contains(&self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad class of agent, one axis coarser than [`Role`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// First-pass analyst.
    Generalist,
    /// One of the deep-dive specialists.
    Specialist,
    /// Final interpreter.
    Synthesizer,
    /// Quality rater.
    Judge,
}

impl AgentKind {
    /// Stable wire name, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Generalist => "generalist",
            AgentKind::Specialist => "specialist",
            AgentKind::Synthesizer => "synthesizer",
            AgentKind::Judge => "judge",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
