//! LLM-as-a-judge scoring of specialist output.

use tracing::{debug, instrument};

use reverie_core::role::Role;
use reverie_core::score::QualityScore;
use reverie_llm::generator::{GenerateError, GenerateRequest, TextGenerator};

use crate::prompts;

/// Scores a candidate analysis against its source dream.
///
/// The judge's reply is pushed through the total score parser, so a
/// malformed reply degrades to the neutral score instead of failing the
/// stage. Only an upstream generation failure is an error here.
#[derive(Clone, Debug)]
pub struct Judge {
    model: String,
}

impl Judge {
    /// A judge running on `model`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// The model this judge runs on.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Rate one candidate analysis.
    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn rate(
        &self,
        generator: &dyn TextGenerator,
        dream: &str,
        candidate: &str,
    ) -> Result<QualityScore, GenerateError> {
        let request =
            GenerateRequest::new(&self.model, prompts::user_prompt(Role::Judge, dream, Some(candidate)))
                .with_system(prompts::JUDGE_SYSTEM);
        let raw = generator.generate(&request).await?;
        let score = QualityScore::parse(&raw);
        debug!(
            depth = score.depth,
            relevance = score.relevance,
            insight = score.insight,
            "candidate rated"
        );
        Ok(score)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
