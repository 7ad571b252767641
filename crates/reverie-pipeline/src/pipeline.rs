//! The pipeline state machine.
//!
//! `START → {GENERALIST | SPECIALISTS}` (entry guard on a pre-supplied
//! first pass), then `SPECIALISTS → RATING → SYNTHESIZER → END`. Batch mode
//! joins the specialists; streaming mode fans their token streams into one
//! ordered event channel and persists along the way.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use reverie_agents::{Agent, Judge, prompts};
use reverie_core::event::PipelineEvent;
use reverie_core::role::Role;
use reverie_core::text::preview;
use reverie_llm::generator::{GenerateError, TextGenerator};
use reverie_llm::models;
use reverie_store::{AnalysisStore, NewAnalysis, SubjectRow};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fanin::FanIn;
use crate::state::{AnalysisRequest, PipelineState};

/// Items yielded by [`Pipeline::stream_first_pass`].
pub type FirstPassStream = Pin<Box<dyn Stream<Item = Result<String, PipelineError>> + Send>>;

/// The multi-agent analysis orchestrator.
///
/// Holds explicit handles to the generation capability and the persistence
/// gateway — both constructed and disposed of by the composition root, not
/// here. Cheap to clone; clones share the handles.
#[derive(Clone)]
pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn AnalysisStore>,
    config: PipelineConfig,
}

impl Pipeline {
    /// A pipeline with default configuration.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn AnalysisStore>) -> Self {
        Self::with_config(generator, store, PipelineConfig::default())
    }

    /// A pipeline with explicit configuration.
    #[must_use]
    pub fn with_config(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn AnalysisStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            store,
            config,
        }
    }

    // ── Batch entry point ────────────────────────────────────────────────

    /// Run the whole pipeline and return the final state.
    ///
    /// Persists one record per executed analysis stage: five without a
    /// pre-supplied first pass, four with one. Aborts on the first upstream
    /// generation failure; never aborts on judge output it cannot parse.
    #[instrument(
        skip(self, request),
        fields(subject_id = request.subject_id, model = %request.model, run_id = %Uuid::new_v4())
    )]
    pub async fn run(&self, request: AnalysisRequest) -> Result<PipelineState, PipelineError> {
        let _ = self.ensure_subject(request.subject_id)?;
        let mut state = PipelineState::new(request);

        // Entry guard: a pre-supplied first pass skips the generalist. The
        // two invocations agree through the persisted record, not through
        // in-memory continuation.
        if state.generalist.is_empty() {
            self.generalist_stage(&mut state).await?;
        } else {
            debug!("first pass pre-supplied, skipping generalist");
        }

        self.specialists_stage(&mut state).await?;
        self.rating_stage(&mut state).await?;

        if self.config.auto_retry {
            self.retry_low_scores(&mut state).await?;
        }

        self.synthesizer_stage(&mut state).await?;
        info!("pipeline complete");
        Ok(state)
    }

    // ── Stages ───────────────────────────────────────────────────────────

    async fn generalist_stage(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let agent = Agent::generalist(&state.model);
        let text = self.invoke(&agent, &state.source, None).await?;
        let id = self.persist(state.subject_id, Role::Generalist, &state.model, &text)?;
        let _ = state.analysis_ids.insert(Role::Generalist, id);
        info!(chars = text.len(), "generalist done");
        state.generalist = text;
        Ok(())
    }

    /// Fan out to the three specialists: an unordered parallel join, each
    /// receiving the dream plus the first-pass context.
    #[instrument(skip_all)]
    async fn specialists_stage(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let [symbol, emotion, theme] = Agent::specialists(&state.model);
        info!(model = %state.model, "running 3 specialists in parallel");

        let context = Some(state.generalist.as_str());
        let (symbol_out, emotion_out, theme_out) = tokio::try_join!(
            self.invoke(&symbol, &state.source, context),
            self.invoke(&emotion, &state.source, context),
            self.invoke(&theme, &state.source, context),
        )?;

        for (role, text) in [
            (Role::Symbol, symbol_out),
            (Role::Emotion, emotion_out),
            (Role::Theme, theme_out),
        ] {
            let id = self.persist(state.subject_id, role, &state.model, &text)?;
            let _ = state.analysis_ids.insert(role, id);
            state.set_output(role, text);
        }
        info!("specialists done");
        Ok(())
    }

    /// Judge each specialist output concurrently and attach the rounded
    /// average to that role's own persisted row.
    #[instrument(skip_all)]
    async fn rating_stage(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let judge = Judge::new(&state.model);
        info!("rating specialist outputs");

        let mut jobs = Vec::new();
        for role in Role::SPECIALISTS {
            if let Some(&id) = state.analysis_ids.get(&role) {
                jobs.push(self.rate_one(&judge, &state.source, state.output(role), role, id));
            }
        }
        let rated = futures::future::try_join_all(jobs).await?;

        for (role, average) in rated {
            let _ = state.scores.insert(role, average);
        }
        info!(scores = ?state.scores, "rating done");
        Ok(())
    }

    async fn rate_one(
        &self,
        judge: &Judge,
        source: &str,
        candidate: &str,
        role: Role,
        analysis_id: i64,
    ) -> Result<(Role, u8), PipelineError> {
        let score = with_timeout(
            self.config.stage_timeout,
            Role::Judge,
            judge.rate(&*self.generator, source, candidate),
        )
        .await?;
        let average = score.average();
        self.store.update_score(analysis_id, average)?;
        debug!(%role, analysis_id, average, "score attached");
        Ok((role, average))
    }

    async fn synthesizer_stage(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let agent = Agent::synthesizer(&state.model);
        let context = prompts::synthesis_context(
            &state.generalist,
            &state.symbol,
            &state.emotion,
            &state.theme,
        );
        let text = self.invoke(&agent, &state.source, Some(&context)).await?;
        let id = self.persist(state.subject_id, Role::Synthesizer, &state.model, &text)?;
        let _ = state.analysis_ids.insert(Role::Synthesizer, id);
        info!(chars = text.len(), "synthesis done");
        state.synthesis = text;
        Ok(())
    }

    // ── Quality retry ────────────────────────────────────────────────────

    /// Re-run every specialist whose score fell below the threshold.
    async fn retry_low_scores(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        for role in Role::SPECIALISTS {
            let low = state
                .scores
                .get(&role)
                .is_some_and(|&s| s < self.config.quality_threshold);
            if low {
                let _ = self.retry_specialist(state, role).await?;
            }
        }
        Ok(())
    }

    /// Quality-retry hook: re-run one specialist on the next-stronger model
    /// and re-rate that role only.
    ///
    /// At most one retry per role per run. Returns `Ok(false)` without
    /// doing anything when the role is not a specialist, was already
    /// retried, or the run's model has nothing stronger to escalate to.
    #[instrument(skip(self, state), fields(subject_id = state.subject_id, %role))]
    pub async fn retry_specialist(
        &self,
        state: &mut PipelineState,
        role: Role,
    ) -> Result<bool, PipelineError> {
        if !role.is_specialist() {
            debug!("not a specialist, nothing to retry");
            return Ok(false);
        }
        if state.retried.contains(&role) {
            debug!("already retried in this run");
            return Ok(false);
        }
        let Some(stronger) = models::escalate(&state.model) else {
            debug!(model = %state.model, "no stronger model to escalate to");
            return Ok(false);
        };
        let Some(agent) = Agent::specialist(role, stronger) else {
            return Ok(false);
        };

        // Marked before the attempt, so even a failed retry is never repeated.
        let _ = state.retried.insert(role);
        info!(from = %state.model, to = %stronger, "retrying specialist on stronger model");

        let text = with_timeout(
            self.config.stage_timeout,
            role,
            agent.analyze(&*self.generator, &state.source, Some(&state.generalist)),
        )
        .await?;

        let id = self.persist(state.subject_id, role, stronger, &text)?;
        let _ = state.analysis_ids.insert(role, id);
        state.set_output(role, text);
        // Score cleared before re-rating; the old row keeps its old score.
        let _ = state.scores.remove(&role);

        let judge = Judge::new(&state.model);
        let (_, average) = self
            .rate_one(&judge, &state.source, state.output(role), role, id)
            .await?;
        let _ = state.scores.insert(role, average);
        Ok(true)
    }

    // ── Streaming entry points ───────────────────────────────────────────

    /// Run the generalist alone, streaming its fragments. The accumulated
    /// text is persisted on clean completion, so a later
    /// [`stream_analysis`](Self::stream_analysis) call can recover it.
    #[instrument(skip(self, model), fields(subject_id, model = %model))]
    pub async fn stream_first_pass(
        &self,
        subject_id: i64,
        model: &str,
    ) -> Result<FirstPassStream, PipelineError> {
        let subject = self.ensure_subject(subject_id)?;
        let agent = Agent::generalist(model);
        let stream = agent
            .analyze_stream(&*self.generator, &subject.content, None)
            .await
            .map_err(|source| PipelineError::Generation {
                role: Role::Generalist,
                source,
            })?;

        let store = Arc::clone(&self.store);
        let model = model.to_string();
        Ok(Box::pin(async_stream::stream! {
            let mut stream = stream;
            let mut text = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => {
                        text.push_str(&fragment);
                        yield Ok(fragment);
                    }
                    Err(source) => {
                        yield Err(PipelineError::Generation { role: Role::Generalist, source });
                        return;
                    }
                }
            }
            match store.create_analysis(&NewAnalysis {
                subject_id,
                role: Role::Generalist,
                model: &model,
                content: &text,
            }) {
                Ok(id) => debug!(id, "first pass persisted"),
                Err(e) => yield Err(PipelineError::Store(e)),
            }
        }))
    }

    /// Run the remainder of the pipeline — specialists, rating, synthesis —
    /// as one ordered event stream.
    ///
    /// The first pass is recovered from the latest persisted generalist
    /// record; if none exists the generalist runs inline first (the same
    /// entry guard as the batch path). Per-producer failures surface as
    /// `agent_failed` events and leave the rest of the stream running;
    /// `done` is emitted only on a fully successful run.
    #[instrument(skip(self, model), fields(subject_id, model = %model, run_id = %Uuid::new_v4()))]
    pub async fn stream_analysis(
        &self,
        subject_id: i64,
        model: &str,
    ) -> Result<ReceiverStream<PipelineEvent>, PipelineError> {
        let subject = self.ensure_subject(subject_id)?;
        let first_pass = self
            .store
            .list_for_subject(subject_id)?
            .into_iter()
            .rev()
            .find(|row| row.role == Role::Generalist)
            .map(|row| row.content);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let pipeline = self.clone();
        let model = model.to_string();
        let _ = tokio::spawn(async move {
            pipeline.drive_stream(subject, model, first_pass, tx).await;
        });
        Ok(ReceiverStream::new(rx))
    }

    /// The streaming run's driver task. Communicates only through `tx`; a
    /// dropped consumer ends the run early.
    async fn drive_stream(
        self,
        subject: SubjectRow,
        model: String,
        first_pass: Option<String>,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        // First pass: recovered, or generated inline.
        let generalist = match first_pass {
            Some(text) => {
                debug!("recovered persisted first pass");
                text
            }
            None => {
                let agent = Agent::generalist(&model);
                let result = with_timeout(
                    self.config.stage_timeout,
                    Role::Generalist,
                    agent.analyze(&*self.generator, &subject.content, None),
                )
                .await
                .and_then(|text| {
                    let _ = self.persist(subject.id, Role::Generalist, &model, &text)?;
                    Ok(text)
                });
                match result {
                    Ok(text) => text,
                    Err(e) => {
                        fail(&tx, Role::Generalist, &e).await;
                        return;
                    }
                }
            }
        };

        // Fan out the three specialist streams. A stream that fails to even
        // start is reported and left behind; the others still run.
        let mut producers = Vec::new();
        let mut dead_on_arrival: Vec<(Role, String)> = Vec::new();
        for agent in Agent::specialists(&model) {
            let role = agent.role();
            match agent
                .analyze_stream(&*self.generator, &subject.content, Some(&generalist))
                .await
            {
                Ok(stream) => producers.push((role, stream)),
                Err(e) => {
                    warn!(%role, error = %e, "specialist stream failed to start");
                    dead_on_arrival.push((role, e.to_string()));
                }
            }
        }
        for (role, error) in dead_on_arrival {
            if tx
                .send(PipelineEvent::AgentFailed { role, error })
                .await
                .is_err()
            {
                return;
            }
        }

        // Drain the fan-in, persisting each specialist as it finishes.
        let mut fanin = FanIn::spawn(producers, self.config.channel_capacity);
        let mut ids: HashMap<Role, i64> = HashMap::new();
        let mut outputs: HashMap<Role, String> = HashMap::new();
        while let Some(event) = fanin.next_event().await {
            if let PipelineEvent::AgentFinished { role, text } = &event {
                match self.persist(subject.id, *role, &model, text) {
                    Ok(id) => {
                        let _ = ids.insert(*role, id);
                        let _ = outputs.insert(*role, text.clone());
                    }
                    Err(e) => {
                        // The consumer got every fragment, but the role can't
                        // be rated or synthesized over; report it failed.
                        fail(&tx, *role, &e).await;
                        continue;
                    }
                }
            }
            if tx.send(event).await.is_err() {
                debug!("consumer dropped, abandoning streaming run");
                return;
            }
        }
        // Pure synchronization: all terminal events were already observed.
        fanin.join().await;

        // Rating: every specialist that finished, concurrently.
        let judge = Judge::new(&model);
        let mut jobs = Vec::new();
        for role in Role::SPECIALISTS {
            if let (Some(&id), Some(text)) = (ids.get(&role), outputs.get(&role)) {
                jobs.push(self.rate_one(&judge, &subject.content, text, role, id));
            }
        }
        let rated = match futures::future::try_join_all(jobs).await {
            Ok(rated) => rated,
            Err(e) => {
                fail(&tx, Role::Judge, &e).await;
                return;
            }
        };
        let scores: BTreeMap<Role, u8> = rated.into_iter().collect();
        if tx
            .send(PipelineEvent::Scores { scores })
            .await
            .is_err()
        {
            return;
        }

        // Synthesis needs all four layers; with a failed specialist the run
        // ends here as an explicitly partial result.
        let (Some(symbol), Some(emotion), Some(theme)) = (
            outputs.get(&Role::Symbol),
            outputs.get(&Role::Emotion),
            outputs.get(&Role::Theme),
        ) else {
            warn!(
                finished = outputs.len(),
                "skipping synthesis, not all specialists finished"
            );
            return;
        };
        let context = prompts::synthesis_context(&generalist, symbol, emotion, theme);
        let agent = Agent::synthesizer(&model);
        let mut stream = match agent
            .analyze_stream(&*self.generator, &subject.content, Some(&context))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                fail(&tx, Role::Synthesizer, &e).await;
                return;
            }
        };

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    text.push_str(&fragment);
                    if tx
                        .send(PipelineEvent::Fragment {
                            role: Role::Synthesizer,
                            fragment,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    fail(&tx, Role::Synthesizer, &e).await;
                    return;
                }
            }
        }
        if let Err(e) = self.persist(subject.id, Role::Synthesizer, &model, &text) {
            fail(&tx, Role::Synthesizer, &e).await;
            return;
        }
        if tx
            .send(PipelineEvent::AgentFinished {
                role: Role::Synthesizer,
                text,
            })
            .await
            .is_err()
        {
            return;
        }
        let _ = tx.send(PipelineEvent::Done).await;
        info!("streaming pipeline complete");
    }

    // ── Shared helpers ───────────────────────────────────────────────────

    fn ensure_subject(&self, subject_id: i64) -> Result<SubjectRow, PipelineError> {
        self.store
            .get_subject(subject_id)?
            .ok_or(PipelineError::SubjectNotFound(subject_id))
    }

    async fn invoke(
        &self,
        agent: &Agent,
        source: &str,
        context: Option<&str>,
    ) -> Result<String, PipelineError> {
        with_timeout(
            self.config.stage_timeout,
            agent.role(),
            agent.analyze(&*self.generator, source, context),
        )
        .await
    }

    fn persist(
        &self,
        subject_id: i64,
        role: Role,
        model: &str,
        content: &str,
    ) -> Result<i64, PipelineError> {
        let id = self.store.create_analysis(&NewAnalysis {
            subject_id,
            role,
            model,
            content,
        })?;
        debug!(id, %role, text = %preview(content, 80), "persisted");
        Ok(id)
    }
}

/// Bound one agent invocation. Expiry is a stage failure, never an empty
/// result.
async fn with_timeout<T>(
    limit: Duration,
    role: Role,
    fut: impl Future<Output = Result<T, GenerateError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(PipelineError::Generation { role, source }),
        Err(_) => Err(PipelineError::StageTimeout { role }),
    }
}

/// Report a stage failure into the event channel.
async fn fail(tx: &mpsc::Sender<PipelineEvent>, role: Role, error: &impl fmt::Display) {
    warn!(%role, %error, "stage failed");
    let _ = tx
        .send(PipelineEvent::AgentFailed {
            role,
            error: error.to_string(),
        })
        .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use assert_matches::assert_matches;

    use reverie_llm::generator::GenerateRequest;
    use reverie_llm::testutil::StubGenerator;
    use reverie_store::MemoryStore;

    use super::*;

    const ALL_ROLES: [Role; 6] = [
        Role::Generalist,
        Role::Symbol,
        Role::Emotion,
        Role::Theme,
        Role::Synthesizer,
        Role::Judge,
    ];

    /// Recover the role a request was made for from its system prompt.
    fn role_of(req: &GenerateRequest) -> Role {
        let system = req.system.as_deref().unwrap_or_default();
        ALL_ROLES
            .into_iter()
            .find(|&role| system == prompts::system_prompt(role))
            .expect("request carries a known system prompt")
    }

    /// Echoes `<role>:<input-hash>` for every request.
    fn echo_stub() -> StubGenerator {
        StubGenerator::from_fn(|req| {
            let mut hasher = DefaultHasher::new();
            req.prompt.hash(&mut hasher);
            Ok(format!("{}:{:x}", role_of(req), hasher.finish()))
        })
    }

    fn pipeline_with(stub: &StubGenerator, store: &Arc<MemoryStore>) -> Pipeline {
        Pipeline::new(Arc::new(stub.clone()), Arc::clone(store) as Arc<dyn AnalysisStore>)
    }

    fn seeded(store: &Arc<MemoryStore>, dream: &str) -> i64 {
        store.create_subject(dream).expect("subject created").id
    }

    fn generalist_calls(stub: &StubGenerator) -> usize {
        stub.calls_with_system(prompts::GENERALIST_SYSTEM)
    }

    // ── Batch pipeline ───────────────────────────────────────────────────

    #[tokio::test]
    async fn full_run_creates_five_records() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "I was flying over a city at night");

        let state = pipeline
            .run(AnalysisRequest::new(
                subject_id,
                "I was flying over a city at night",
                "qwen2.5:7b",
            ))
            .await
            .unwrap();

        let rows = store.list_for_subject(subject_id).unwrap();
        assert_eq!(rows.len(), 5);
        let roles: Vec<Role> = rows.iter().map(|r| r.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::Generalist,
                Role::Symbol,
                Role::Emotion,
                Role::Theme,
                Role::Synthesizer,
            ]
        );
        assert!(!state.synthesis.is_empty());
        assert!(state.generalist.starts_with("generalist:"));
    }

    #[tokio::test]
    async fn synthesis_context_follows_canonical_order() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "I was flying over a city at night");

        let state = pipeline
            .run(AnalysisRequest::new(
                subject_id,
                "I was flying over a city at night",
                "qwen2.5:7b",
            ))
            .await
            .unwrap();

        // The synthesizer's prompt carries all four upstream outputs, in
        // fixed order: generalist, symbol, emotion, theme.
        let synth_call = stub
            .calls()
            .into_iter()
            .find(|c| role_of(c) == Role::Synthesizer)
            .unwrap();
        let positions: Vec<usize> = [&state.generalist, &state.symbol, &state.emotion, &state.theme]
            .iter()
            .map(|text| synth_call.prompt.find(text.as_str()).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        for tag in ["generalist:", "symbol:", "emotion:", "theme:"] {
            assert!(synth_call.prompt.contains(tag));
        }
    }

    #[tokio::test]
    async fn pre_supplied_first_pass_skips_generalist() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a quiet house");

        let state = pipeline
            .run(
                AnalysisRequest::new(subject_id, "a quiet house", "qwen2.5:7b")
                    .with_first_pass("previously streamed first pass"),
            )
            .await
            .unwrap();

        assert_eq!(generalist_calls(&stub), 0);
        assert_eq!(state.generalist, "previously streamed first pass");
        assert_eq!(store.list_for_subject(subject_id).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn score_updates_target_each_roles_own_row() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a bridge at dawn");

        let state = pipeline
            .run(AnalysisRequest::new(subject_id, "a bridge at dawn", "qwen2.5:7b"))
            .await
            .unwrap();

        let rows = store.list_for_subject(subject_id).unwrap();
        for role in Role::SPECIALISTS {
            let id = state.analysis_ids[&role];
            let row = rows.iter().find(|r| r.id == id).unwrap();
            assert_eq!(row.role, role);
            assert_eq!(row.score, Some(state.scores[&role]));
        }
        // Non-specialist rows never receive a score.
        for row in rows.iter().filter(|r| !r.role.is_specialist()) {
            assert_eq!(row.score, None);
        }
    }

    #[tokio::test]
    async fn malformed_judge_output_defaults_every_score() {
        // The echo stub replies `judge:<hash>` to the judge — unparseable.
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "an endless corridor");

        let state = pipeline
            .run(AnalysisRequest::new(subject_id, "an endless corridor", "qwen2.5:7b"))
            .await
            .unwrap();

        for role in Role::SPECIALISTS {
            assert_eq!(state.scores[&role], 3);
        }
        for row in store
            .list_for_subject(subject_id)
            .unwrap()
            .iter()
            .filter(|r| r.role.is_specialist())
        {
            assert_eq!(row.score, Some(3));
        }
    }

    #[tokio::test]
    async fn missing_subject_fails_before_any_model_call() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);

        let err = pipeline
            .run(AnalysisRequest::new(42, "never analyzed", "qwen2.5:7b"))
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::SubjectNotFound(42));
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_aborts_the_run() {
        let stub = StubGenerator::from_fn(|req| {
            if req.system.as_deref() == Some(prompts::SYMBOL_SYSTEM) {
                Err("backend went away".into())
            } else {
                Ok("fine".into())
            }
        });
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a storm");

        let err = pipeline
            .run(AnalysisRequest::new(subject_id, "a storm", "qwen2.5:7b"))
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::Generation { role: Role::Symbol, .. });

        // Only the generalist row exists; no partial specialist rows.
        let rows = store.list_for_subject(subject_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::Generalist);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stage_times_out() {
        let stub = echo_stub().with_delay(Duration::from_secs(10));
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig {
            stage_timeout: Duration::from_secs(1),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::with_config(Arc::new(stub), Arc::clone(&store) as Arc<dyn AnalysisStore>, config);
        let subject_id = seeded(&store, "slow dream");

        let err = pipeline
            .run(AnalysisRequest::new(subject_id, "slow dream", "qwen2.5:7b"))
            .await
            .unwrap_err();
        assert_matches!(err, PipelineError::StageTimeout { role: Role::Generalist });
    }

    // ── Quality retry ────────────────────────────────────────────────────

    /// Specialists answer weakly on the base model and strongly on the
    /// escalated one; the judge scores accordingly.
    fn escalation_stub() -> StubGenerator {
        StubGenerator::from_fn(|req| {
            Ok(match role_of(req) {
                Role::Judge => {
                    if req.prompt.contains("strong") {
                        r#"{"depth": 5, "relevance": 5, "insight": 5}"#.to_string()
                    } else {
                        r#"{"depth": 1, "relevance": 1, "insight": 1}"#.to_string()
                    }
                }
                role => {
                    if req.model == "qwen2.5:7b" {
                        format!("weak {role} take")
                    } else {
                        format!("strong {role} take")
                    }
                }
            })
        })
    }

    #[tokio::test]
    async fn retry_escalates_one_specialist_and_rerates_it() {
        let stub = escalation_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a locked gate");

        let mut state = pipeline
            .run(AnalysisRequest::new(subject_id, "a locked gate", "qwen2.5:7b"))
            .await
            .unwrap();
        assert_eq!(state.scores[&Role::Symbol], 1);
        let old_id = state.analysis_ids[&Role::Symbol];

        let retried = pipeline
            .retry_specialist(&mut state, Role::Symbol)
            .await
            .unwrap();
        assert!(retried);
        assert!(state.retried.contains(&Role::Symbol));
        assert_eq!(state.scores[&Role::Symbol], 5);
        assert!(state.symbol.starts_with("strong"));

        // A fresh row was created for the retried output and scored; the
        // original row keeps its original score.
        let new_id = state.analysis_ids[&Role::Symbol];
        assert_ne!(new_id, old_id);
        let rows = store.list_for_subject(subject_id).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows.iter().find(|r| r.id == old_id).unwrap().score, Some(1));
        let new_row = rows.iter().find(|r| r.id == new_id).unwrap();
        assert_eq!(new_row.score, Some(5));
        assert_eq!(new_row.model, "llama3.1:8b");
    }

    #[tokio::test]
    async fn retry_is_at_most_once_per_role() {
        let stub = escalation_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a locked gate");

        let mut state = pipeline
            .run(AnalysisRequest::new(subject_id, "a locked gate", "qwen2.5:7b"))
            .await
            .unwrap();

        assert!(pipeline.retry_specialist(&mut state, Role::Theme).await.unwrap());
        let rows_after_first = store.list_for_subject(subject_id).unwrap().len();

        // Second invocation for the same role is a no-op.
        assert!(!pipeline.retry_specialist(&mut state, Role::Theme).await.unwrap());
        assert_eq!(store.list_for_subject(subject_id).unwrap().len(), rows_after_first);
        assert_eq!(state.retried.iter().filter(|&&r| r == Role::Theme).count(), 1);
    }

    #[tokio::test]
    async fn retry_refuses_non_specialists_and_top_models() {
        let stub = escalation_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a locked gate");

        let mut state = pipeline
            .run(AnalysisRequest::new(subject_id, "a locked gate", "qwen2.5:7b"))
            .await
            .unwrap();
        assert!(!pipeline.retry_specialist(&mut state, Role::Generalist).await.unwrap());
        assert!(!pipeline.retry_specialist(&mut state, Role::Judge).await.unwrap());

        // Already on the strongest model: nowhere to escalate.
        let mut top_state = PipelineState::new(
            AnalysisRequest::new(subject_id, "a locked gate", "llama3.3:70b"),
        );
        assert!(!pipeline.retry_specialist(&mut top_state, Role::Symbol).await.unwrap());
        assert!(top_state.retried.is_empty());
    }

    #[tokio::test]
    async fn auto_retry_sweeps_every_low_score() {
        let stub = escalation_stub();
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig {
            auto_retry: true,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::with_config(
            Arc::new(stub.clone()),
            Arc::clone(&store) as Arc<dyn AnalysisStore>,
            config,
        );
        let subject_id = seeded(&store, "a locked gate");

        let state = pipeline
            .run(AnalysisRequest::new(subject_id, "a locked gate", "qwen2.5:7b"))
            .await
            .unwrap();

        for role in Role::SPECIALISTS {
            assert!(state.retried.contains(&role));
            assert_eq!(state.scores[&role], 5);
        }
        // 5 original stage rows + 3 retry rows.
        assert_eq!(store.list_for_subject(subject_id).unwrap().len(), 8);
        // The synthesis saw the strong (retried) outputs.
        let synth_call = stub
            .calls()
            .into_iter()
            .find(|c| role_of(c) == Role::Synthesizer)
            .unwrap();
        assert!(synth_call.prompt.contains("strong symbol take"));
        assert!(synth_call.prompt.contains("strong emotion take"));
        assert!(synth_call.prompt.contains("strong theme take"));
    }

    // ── Streaming entry points ───────────────────────────────────────────

    #[tokio::test]
    async fn stream_first_pass_yields_and_persists() {
        let stub = StubGenerator::fixed("mapped out the dream landscape");
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a city at night");

        let mut stream = pipeline
            .stream_first_pass(subject_id, "qwen2.5:7b")
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(item) = stream.next().await {
            text.push_str(&item.unwrap());
        }
        assert_eq!(text, "mapped out the dream landscape");

        let rows = store.list_for_subject(subject_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::Generalist);
        assert_eq!(rows[0].content, "mapped out the dream landscape");
    }

    #[tokio::test]
    async fn stream_first_pass_rejects_missing_subject() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);

        let err = match pipeline.stream_first_pass(7, "m").await {
            Ok(_) => panic!("expected stream_first_pass to reject missing subject"),
            Err(e) => e,
        };
        assert_matches!(err, PipelineError::SubjectNotFound(7));
        assert!(stub.calls().is_empty());
    }

    async fn collect_events(
        mut stream: ReceiverStream<PipelineEvent>,
    ) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn stream_analysis_recovers_persisted_first_pass() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a city at night");
        let _ = store
            .create_analysis(&NewAnalysis {
                subject_id,
                role: Role::Generalist,
                model: "qwen2.5:7b",
                content: "prior first pass",
            })
            .unwrap();

        let stream = pipeline.stream_analysis(subject_id, "qwen2.5:7b").await.unwrap();
        let events = collect_events(stream).await;

        // Generalist was recovered, not re-invoked.
        assert_eq!(generalist_calls(&stub), 0);
        let specialist_call = stub
            .calls()
            .into_iter()
            .find(|c| role_of(c).is_specialist())
            .unwrap();
        assert!(specialist_call.prompt.contains("prior first pass"));

        // The run closed cleanly.
        assert_eq!(events.last().unwrap(), &PipelineEvent::Done);

        // Every specialist's fragments concatenate to its finished text.
        for role in Role::SPECIALISTS {
            let assembled: String = events
                .iter()
                .filter_map(|e| match e {
                    PipelineEvent::Fragment { role: r, fragment } if *r == role => {
                        Some(fragment.as_str())
                    }
                    _ => None,
                })
                .collect();
            let finished = events
                .iter()
                .find_map(|e| match e {
                    PipelineEvent::AgentFinished { role: r, text } if *r == role => Some(text),
                    _ => None,
                })
                .unwrap();
            assert_eq!(&assembled, finished);
        }

        // Scores arrive after every specialist terminal and before any
        // synthesizer fragment.
        let scores_at = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::Scores { .. }))
            .unwrap();
        let last_specialist_terminal = events
            .iter()
            .rposition(|e| e.is_terminal() && e.role().is_some_and(Role::is_specialist))
            .unwrap();
        let first_synth_fragment = events
            .iter()
            .position(|e| {
                matches!(e, PipelineEvent::Fragment { role, .. } if *role == Role::Synthesizer)
            })
            .unwrap();
        assert!(last_specialist_terminal < scores_at);
        assert!(scores_at < first_synth_fragment);

        // 1 recovered + 3 specialists + 1 synthesis.
        assert_eq!(store.list_for_subject(subject_id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn stream_analysis_runs_generalist_inline_when_missing() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a city at night");

        let stream = pipeline.stream_analysis(subject_id, "qwen2.5:7b").await.unwrap();
        let events = collect_events(stream).await;

        assert_eq!(generalist_calls(&stub), 1);
        assert_eq!(events.last().unwrap(), &PipelineEvent::Done);
        assert_eq!(store.list_for_subject(subject_id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn stream_analysis_surfaces_partial_failure() {
        let stub = echo_stub().with_stream_failure_after(0, |req| {
            req.system.as_deref() == Some(prompts::SYMBOL_SYSTEM)
        });
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);
        let subject_id = seeded(&store, "a city at night");
        let _ = store
            .create_analysis(&NewAnalysis {
                subject_id,
                role: Role::Generalist,
                model: "qwen2.5:7b",
                content: "prior first pass",
            })
            .unwrap();

        let stream = pipeline.stream_analysis(subject_id, "qwen2.5:7b").await.unwrap();
        let events = collect_events(stream).await;

        // The symbol stream died; the other two finished and were rated.
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::AgentFailed { role: Role::Symbol, .. }
        )));
        let finished: Vec<Role> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::AgentFinished { role, .. } => Some(*role),
                _ => None,
            })
            .collect();
        assert!(finished.contains(&Role::Emotion));
        assert!(finished.contains(&Role::Theme));

        let scores = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Scores { scores } => Some(scores.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(!scores.contains_key(&Role::Symbol));

        // Partial result: no synthesis, no done — but nothing silent.
        assert!(!events.contains(&PipelineEvent::Done));
        assert!(!events.iter().any(|e| matches!(
            e,
            PipelineEvent::Fragment { role: Role::Synthesizer, .. }
        )));

        // Persisted: recovered generalist + the two surviving specialists.
        let rows = store.list_for_subject(subject_id).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.role != Role::Symbol));
    }

    #[tokio::test]
    async fn stream_analysis_rejects_missing_subject() {
        let stub = echo_stub();
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline_with(&stub, &store);

        let err = pipeline.stream_analysis(9, "m").await.unwrap_err();
        assert_matches!(err, PipelineError::SubjectNotFound(9));
        assert!(stub.calls().is_empty());
    }
}
