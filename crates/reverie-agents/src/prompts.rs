//! Per-role system prompts and prompt builders.
//!
//! The synthesis context labels and their order are part of the pipeline
//! contract — tests assert on them, and the synthesizer prompt tells the
//! model what each labeled block is.

use reverie_core::role::Role;

/// First-pass analyst: maps the landscape for the specialists.
pub const GENERALIST_SYSTEM: &str = "\
You are a dream analyst doing a first-pass read of a dream. Your job is to map \
out the landscape so other specialists can go deeper.

Structure your response with these exact sections:

Overview: A few sentences on the overall feel and narrative of the dream.
Key Symbols: The main symbols you notice, with a brief note on each.
Emotional Tone: What emotions are present or implied? What is the dreamer feeling?
Themes: The core psychological or life themes this dream seems to be touching on.

Be concise. Each section should be 2-4 sentences of prose, no bullet points.";

/// Symbol specialist: archetypes, personal meaning, symbol interplay.
pub const SYMBOL_SYSTEM: &str = "\
You are a dream symbol analyst. You specialize exclusively in the deep meaning \
of symbols.

You have been given a first-pass analysis of a dream. Go significantly deeper \
on the symbols only. For each symbol: its archetypal or cultural meaning, what \
it might represent personally for the dreamer, how its specific state or \
behavior in the dream adds meaning, and how it connects to the other symbols \
present.

Write in flowing prose. Be specific to this dream, not generic. 3-4 paragraphs \
maximum.";

/// Emotion specialist: the emotional landscape and its tensions.
pub const EMOTION_SYSTEM: &str = "\
You are a dream emotion analyst. You specialize exclusively in the emotional \
landscape of dreams.

You have been given a first-pass analysis of a dream. Go significantly deeper \
on the emotions only: the explicit and implicit emotions present, emotional \
contradictions or tensions, what the tone reveals about the dreamer's current \
inner state, how the emotions shift across the dream, and what unresolved \
feelings or needs they might point to.

Write in flowing prose. Be specific to this dream, not generic. 3-4 paragraphs \
maximum.";

/// Theme specialist: psychological and life themes.
pub const THEME_SYSTEM: &str = "\
You are a dream theme analyst. You specialize exclusively in the psychological \
and life themes in dreams.

You have been given a first-pass analysis of a dream. Go significantly deeper \
on the themes only: the core life themes the dream engages with, what each \
suggests about the dreamer's waking situation, how the themes relate to each \
other, and what the dream might be trying to work through. Bring in \
psychological frameworks only where they genuinely fit.

Write in flowing prose. Be specific to this dream, not generic. 3-4 paragraphs \
maximum.";

/// Synthesizer: the final interpretation over all prior layers.
pub const SYNTHESIZER_SYSTEM: &str = "\
You are the final interpreter in a multi-agent dream analysis pipeline.

You have received a first-pass analysis plus three specialist analyses \
covering symbols, emotions, and themes in depth. Synthesize everything into \
one final interpretation. Don't repeat or summarize what the specialists said \
— find the connections between layers. What emerges when the symbol, \
emotional, and thematic readings are brought together?

Be specific to this dream. No generic life-coaching, no advice. Pure \
interpretation — what the dream reveals, not what the dreamer should do. 2-3 \
paragraphs maximum.";

/// Judge: three-axis rating, JSON only.
pub const JUDGE_SYSTEM: &str = "\
You are evaluating the quality of a dream analysis. Be honest and critical.

Rate the analysis on three dimensions:
- depth: Does it go beyond the obvious? Does it explore nuance? (1-5)
- relevance: Is it grounded in the actual dream content, not generic? (1-5)
- insight: Does it offer genuine insight the dreamer couldn't easily see \
themselves? (1-5)

Respond with ONLY valid JSON, no explanation, no markdown:
{\"depth\": <1-5>, \"relevance\": <1-5>, \"insight\": <1-5>}";

/// The system prompt for an analysis role.
#[must_use]
pub fn system_prompt(role: Role) -> &'static str {
    match role {
        Role::Generalist => GENERALIST_SYSTEM,
        Role::Symbol => SYMBOL_SYSTEM,
        Role::Emotion => EMOTION_SYSTEM,
        Role::Theme => THEME_SYSTEM,
        Role::Synthesizer => SYNTHESIZER_SYSTEM,
        Role::Judge => JUDGE_SYSTEM,
    }
}

/// The user prompt for an analysis role.
///
/// The generalist sees the bare dream; specialists see the dream plus the
/// first-pass analysis; the synthesizer sees the dream plus the labeled
/// context blob from [`synthesis_context`].
#[must_use]
pub fn user_prompt(role: Role, dream: &str, context: Option<&str>) -> String {
    match role {
        Role::Generalist => {
            format!("Here's the dream:\n\n\"{dream}\"\n\nProvide a structured first-pass analysis.")
        }
        Role::Symbol => specialist_prompt(dream, context, "Provide a deep symbol analysis."),
        Role::Emotion => specialist_prompt(dream, context, "Provide a deep emotional analysis."),
        Role::Theme => specialist_prompt(dream, context, "Provide a deep thematic analysis."),
        Role::Synthesizer => format!(
            "Dream:\n\"{dream}\"\n\nSpecialist analyses:\n{}\n\nWrite the final synthesis.",
            context.unwrap_or_default()
        ),
        Role::Judge => format!(
            "Dream:\n\"{dream}\"\n\nAnalysis to evaluate:\n{}",
            context.unwrap_or_default()
        ),
    }
}

fn specialist_prompt(dream: &str, context: Option<&str>, ask: &str) -> String {
    format!(
        "Dream:\n\"{dream}\"\n\nFirst-pass analysis:\n{}\n\n{ask}",
        context.unwrap_or_default()
    )
}

/// The synthesizer's context blob: all four upstream outputs, labeled, in
/// fixed order (first-pass, symbol, emotion, theme).
#[must_use]
pub fn synthesis_context(generalist: &str, symbol: &str, emotion: &str, theme: &str) -> String {
    format!(
        "First-pass analysis:\n{generalist}\n\n\
         Symbol analysis:\n{symbol}\n\n\
         Emotion analysis:\n{emotion}\n\n\
         Theme analysis:\n{theme}"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
