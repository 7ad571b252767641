//! The tagged agent type shared by every analysis role.

use tracing::{debug, instrument};

use reverie_core::role::{AgentKind, Role};
use reverie_llm::generator::{FragmentStream, GenerateError, GenerateRequest, TextGenerator};

use crate::prompts;

/// One analysis agent: a role-specific prompt template bound to a model.
///
/// Construction is closed — [`generalist`](Agent::generalist),
/// [`specialists`](Agent::specialists), [`specialist`](Agent::specialist),
/// and [`synthesizer`](Agent::synthesizer) are the only ways to get one, so
/// every variant the pipeline can run is visible here. The judge has a
/// different contract and lives in [`crate::judge`].
#[derive(Clone, Debug)]
pub struct Agent {
    role: Role,
    model: String,
}

impl Agent {
    /// The first-pass analyst.
    #[must_use]
    pub fn generalist(model: impl Into<String>) -> Self {
        Self {
            role: Role::Generalist,
            model: model.into(),
        }
    }

    /// One deep-dive specialist. Returns `None` for non-specialist roles.
    #[must_use]
    pub fn specialist(role: Role, model: impl Into<String>) -> Option<Self> {
        role.is_specialist().then(|| Self {
            role,
            model: model.into(),
        })
    }

    /// All three specialists in canonical order, on the same model.
    #[must_use]
    pub fn specialists(model: &str) -> [Self; 3] {
        Role::SPECIALISTS.map(|role| Self {
            role,
            model: model.to_string(),
        })
    }

    /// The final interpreter.
    #[must_use]
    pub fn synthesizer(model: impl Into<String>) -> Self {
        Self {
            role: Role::Synthesizer,
            model: model.into(),
        }
    }

    /// This agent's role tag.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Coarse kind recorded with persisted output.
    #[must_use]
    pub fn kind(&self) -> AgentKind {
        self.role.kind()
    }

    /// The model this agent runs on.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, dream: &str, context: Option<&str>) -> GenerateRequest {
        GenerateRequest::new(&self.model, prompts::user_prompt(self.role, dream, context))
            .with_system(prompts::system_prompt(self.role))
    }

    /// Analyze a dream, single shot.
    #[instrument(skip_all, fields(role = %self.role, model = %self.model))]
    pub async fn analyze(
        &self,
        generator: &dyn TextGenerator,
        dream: &str,
        context: Option<&str>,
    ) -> Result<String, GenerateError> {
        debug!("agent analyzing");
        generator.generate(&self.request(dream, context)).await
    }

    /// Analyze a dream, yielding fragments as they are generated.
    #[instrument(skip_all, fields(role = %self.role, model = %self.model))]
    pub async fn analyze_stream(
        &self,
        generator: &dyn TextGenerator,
        dream: &str,
        context: Option<&str>,
    ) -> Result<FragmentStream, GenerateError> {
        debug!("agent streaming");
        generator
            .generate_stream(&self.request(dream, context))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
