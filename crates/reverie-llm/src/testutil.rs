//! Scriptable [`TextGenerator`] stubs for tests.
//!
//! Used across the workspace wherever a test needs a deterministic backend:
//! fixed or computed replies, injected failures, optional virtual latency,
//! and a recorded call log for asserting which stages actually ran.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::generator::{FragmentStream, GenerateError, GenerateRequest, TextGenerator};

type ReplyFn = dyn Fn(&GenerateRequest) -> Result<String, String> + Send + Sync;

/// A deterministic, scriptable generator.
///
/// Cheap to clone; clones share the call log, so a test can hand one clone
/// to the pipeline and keep another for assertions.
#[derive(Clone)]
pub struct StubGenerator {
    reply: Arc<ReplyFn>,
    calls: Arc<Mutex<Vec<GenerateRequest>>>,
    delay: Option<Duration>,
    fail_stream_after: Option<(usize, Arc<dyn Fn(&GenerateRequest) -> bool + Send + Sync>)>,
}

impl StubGenerator {
    /// Always reply with the same text.
    #[must_use]
    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_| Ok(text.clone()))
    }

    /// Compute the reply from the request. Return `Err` to simulate a
    /// backend failure (surfaced as a 500 [`GenerateError::Api`]).
    pub fn from_fn(
        reply: impl Fn(&GenerateRequest) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Arc::new(reply),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            fail_stream_after: None,
        }
    }

    /// Sleep this long (virtual time under a paused runtime) before every
    /// reply and before every streamed fragment.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make streams for matching requests die mid-flight: `fragments`
    /// fragments are yielded, then an error.
    #[must_use]
    pub fn with_stream_failure_after(
        mut self,
        fragments: usize,
        matches: impl Fn(&GenerateRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.fail_stream_after = Some((fragments, Arc::new(matches)));
        self
    }

    /// Every request seen so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose system instruction equals `system`.
    #[must_use]
    pub fn calls_with_system(&self, system: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.system.as_deref() == Some(system))
            .count()
    }

    fn record_and_reply(&self, req: &GenerateRequest) -> Result<String, GenerateError> {
        self.calls.lock().push(req.clone());
        (self.reply)(req).map_err(|message| GenerateError::Api {
            status: 500,
            message,
        })
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, req: &GenerateRequest) -> Result<String, GenerateError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.record_and_reply(req)
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<FragmentStream, GenerateError> {
        let text = self.record_and_reply(req)?;
        let delay = self.delay;
        let die_after = match &self.fail_stream_after {
            Some((n, matches)) if matches(req) => Some(*n),
            _ => None,
        };
        Ok(Box::pin(async_stream::stream! {
            // Word-sized fragments keep streamed output identical to the
            // single-shot text once concatenated.
            let mut yielded = 0usize;
            let mut rest = text.as_str();
            while !rest.is_empty() {
                if die_after == Some(yielded) {
                    yield Err(GenerateError::Malformed("stream cut short".into()));
                    return;
                }
                let split = rest
                    .char_indices()
                    .find(|&(_, c)| c == ' ')
                    .map_or(rest.len(), |(i, _)| i + 1);
                let (fragment, tail) = rest.split_at(split);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(fragment.to_string());
                yielded += 1;
                rest = tail;
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
