//! Multi-role evaluation coordinator.
//!
//! Drives each idea through the fixed role pipeline:
//!
//! ```text
//! Generate ─► novelty filter ─► Critique ─► rank, keep top-K
//!                                   │
//!                     ┌─────────────┴─────────────┐
//!                 Advocate                     Skeptic      (concurrent)
//!                     └─────────────┬─────────────┘
//!                                Improve ─► Re-evaluate ─► Done
//! ```
//!
//! Ideas are independent units of concurrent work: permanent failure of one
//! stage rejects that idea only, never its siblings. The novelty filter
//! runs before critique so duplicate ideas never reach the expensive
//! downstream calls. When a reasoning engine is attached and enabled,
//! critique and improvement are enriched with similar past context and the
//! final result carries multi-dimensional and inference attachments; any
//! reasoning failure is logged and the unenriched result ships instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{
    complete_with_retry, Completion, CompletionRequest, RetryPolicy, TextCompletionClient,
};
use crate::error::{CompletionError, ConfigurationError, CoordinatorError, StageFailure};
use crate::prompts;
use crate::reasoning::ReasoningEngine;
use crate::similarity;
use crate::types::{
    Advocacy, CompletedIdea, Evaluation, Idea, IdeaState, RejectionReason, Skepticism, Stage,
    StageTemperatures, TemperaturePolicy, WorkflowResult,
};

/// Hard cap on ideas carried past critique.
pub const MAX_TOP_CANDIDATES: usize = 5;

/// Hard cap on concurrently running idea pipelines.
pub const MAX_IDEA_PARALLELISM: usize = 5;

/// One evaluation run's input.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub topic: String,
    pub constraints: String,
    /// Raw ideas to generate before filtering and ranking.
    pub num_candidates: usize,
}

impl RunRequest {
    pub fn new(
        topic: impl Into<String>,
        constraints: impl Into<String>,
        num_candidates: usize,
    ) -> Self {
        Self {
            topic: topic.into(),
            constraints: constraints.into(),
            num_candidates,
        }
    }
}

/// Coordinator knobs, validated before any network call.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Ideas carried past critique, 1..=5.
    pub num_top_candidates: usize,
    /// Token-overlap similarity at or above this marks a near duplicate.
    pub novelty_threshold: f64,
    pub temperatures: TemperaturePolicy,
    /// Gate for the attached reasoning engine; off means the engine is
    /// never consulted even when present.
    pub enhanced_reasoning: bool,
    /// Concurrent idea pipelines; defaults to the surviving idea count,
    /// capped at [`MAX_IDEA_PARALLELISM`].
    pub max_parallelism: Option<usize>,
    /// Whole-run deadline. Ideas not `Done` when it expires are rejected
    /// with a timeout reason; finished ideas are still returned.
    pub deadline: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_top_candidates: 2,
            novelty_threshold: 0.8,
            temperatures: TemperaturePolicy::default(),
            enhanced_reasoning: false,
            max_parallelism: None,
            deadline: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.num_top_candidates == 0 || self.num_top_candidates > MAX_TOP_CANDIDATES {
            return Err(ConfigurationError::TopCandidatesOutOfRange(
                self.num_top_candidates,
            ));
        }
        if !(0.0..=1.0).contains(&self.novelty_threshold) {
            return Err(ConfigurationError::NoveltyThresholdOutOfRange(
                self.novelty_threshold,
            ));
        }
        let temps = self.temperatures.resolve();
        for (name, value) in [
            ("generation", temps.generation),
            ("analytical", temps.analytical),
            ("balanced", temps.balanced),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigurationError::TemperatureOutOfRange { stage: name, value });
            }
        }
        if self.max_parallelism == Some(0) {
            return Err(ConfigurationError::ZeroParallelism);
        }
        Ok(())
    }
}

/// Stage-boundary progress hook: `(stage, idea_index, fraction_complete)`.
pub type ProgressCallback = Arc<dyn Fn(Stage, usize, f64) + Send + Sync>;

/// Shared per-run state handed into spawned stage tasks.
#[derive(Clone)]
struct StageCtx {
    client: Arc<dyn TextCompletionClient>,
    retry: RetryPolicy,
    temps: StageTemperatures,
    topic: String,
    constraints: String,
    reasoning: Option<Arc<ReasoningEngine>>,
    progress: Option<ProgressCallback>,
    deadline_at: Option<Instant>,
}

impl StageCtx {
    fn report(&self, stage: Stage, idea_index: usize) {
        if let Some(callback) = &self.progress {
            callback(stage, idea_index, stage.fraction_complete());
        }
    }

    async fn complete(
        &self,
        prompt: String,
        temperature: f64,
    ) -> Result<Completion, CompletionError> {
        complete_with_retry(
            self.client.as_ref(),
            CompletionRequest::text(prompt, temperature),
            &self.retry,
        )
        .await
    }
}

/// Run the future against the run deadline, rejecting with `Timeout` when
/// it expires first.
async fn with_deadline<T>(
    deadline_at: Option<Instant>,
    fut: impl std::future::Future<Output = Result<T, RejectionReason>>,
) -> Result<T, RejectionReason> {
    match deadline_at {
        None => fut.await,
        Some(at) => match tokio::time::timeout_at(at, fut).await {
            Ok(result) => result,
            Err(_) => Err(RejectionReason::Timeout),
        },
    }
}

/// One generation slot: either a live idea or a recorded rejection.
enum Slot {
    Alive(Idea),
    Dead { idea: Idea, reason: RejectionReason },
}

/// The multi-role evaluation coordinator.
pub struct Coordinator {
    client: Arc<dyn TextCompletionClient>,
    options: RunOptions,
    reasoning: Option<Arc<ReasoningEngine>>,
    progress: Option<ProgressCallback>,
}

impl Coordinator {
    /// Fails fast on invalid options, before anything is spent.
    pub fn new(
        client: Arc<dyn TextCompletionClient>,
        options: RunOptions,
    ) -> Result<Self, CoordinatorError> {
        options.validate()?;
        Ok(Self {
            client,
            options,
            reasoning: None,
            progress: None,
        })
    }

    /// Attach a reasoning engine. Consulted only when
    /// [`RunOptions::enhanced_reasoning`] is set.
    pub fn with_reasoning(mut self, engine: Arc<ReasoningEngine>) -> Self {
        self.reasoning = Some(engine);
        self
    }

    /// Attach a stage-boundary progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run the full pipeline for one topic.
    ///
    /// Completed ideas come back first, in critique-ranking order (not
    /// completion order); rejected ideas follow in generation-slot order.
    pub async fn run(
        &self,
        request: RunRequest,
    ) -> Result<Vec<WorkflowResult>, CoordinatorError> {
        if request.num_candidates == 0 {
            return Err(ConfigurationError::NoCandidates.into());
        }

        let run_id = Uuid::new_v4();
        let deadline_at = self.options.deadline.map(|d| Instant::now() + d);
        let ctx = StageCtx {
            client: Arc::clone(&self.client),
            retry: self.options.retry.clone(),
            temps: self.options.temperatures.resolve(),
            topic: request.topic.clone(),
            constraints: request.constraints.clone(),
            reasoning: if self.options.enhanced_reasoning {
                self.reasoning.clone()
            } else {
                None
            },
            progress: self.progress.clone(),
            deadline_at,
        };

        info!(
            %run_id,
            topic = %request.topic,
            candidates = request.num_candidates,
            enhanced = ctx.reasoning.is_some(),
            "starting evaluation run"
        );

        // Generate, then drop duplicates before anything expensive runs.
        let mut slots = self.generate_candidates(&ctx, request.num_candidates).await;
        self.apply_novelty_filter(&mut slots);

        // Critique survivors and keep the top K.
        let critiqued = self.critique_candidates(&ctx, &mut slots).await;
        let ranked = rank_candidates(critiqued, self.options.num_top_candidates);

        info!(
            %run_id,
            surviving = ranked.len(),
            "critique ranking complete, running idea pipelines"
        );

        // Fan out one pipeline per surviving idea.
        let parallelism = self
            .options
            .max_parallelism
            .unwrap_or(ranked.len().clamp(1, MAX_IDEA_PARALLELISM));
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let mut handles: Vec<(Idea, JoinHandle<Result<CompletedIdea, RejectionReason>>)> =
            Vec::with_capacity(ranked.len());
        for (index, idea, evaluation) in ranked {
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_idea = idea.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                with_deadline(
                    ctx.deadline_at,
                    idea_pipeline(&ctx, &task_idea, evaluation, index),
                )
                .await
            });
            handles.push((idea, handle));
        }

        // Completed ideas first, in rank order.
        let mut results: Vec<WorkflowResult> = Vec::new();
        for (idea, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(completed)) => WorkflowResult::completed(idea, completed),
                Ok(Err(reason)) => WorkflowResult::rejected(idea, reason),
                Err(join_error) => WorkflowResult::rejected(
                    idea,
                    RejectionReason::StageFailed {
                        stage: Stage::Improve,
                        detail: format!("pipeline task failed: {join_error}"),
                    },
                ),
            };
            results.push(outcome);
        }

        // Then everything rejected before ranking, in slot order.
        for slot in slots {
            if let Slot::Dead { idea, reason } = slot {
                results.push(WorkflowResult::rejected(idea, reason));
            }
        }

        info!(
            %run_id,
            completed = results.iter().filter(|r| r.outcome.is_completed()).count(),
            total = results.len(),
            "evaluation run finished"
        );
        Ok(results)
    }

    /// Fan out one generation call per slot at the generation temperature.
    async fn generate_candidates(&self, ctx: &StageCtx, count: usize) -> Vec<Slot> {
        let parallelism = self
            .options
            .max_parallelism
            .unwrap_or(count.clamp(1, MAX_IDEA_PARALLELISM));
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let mut handles: Vec<JoinHandle<Result<Idea, RejectionReason>>> =
            Vec::with_capacity(count);
        for variation in 0..count {
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                with_deadline(ctx.deadline_at, async {
                    let prompt =
                        prompts::generation_prompt(&ctx.topic, &ctx.constraints, variation);
                    let completion = ctx
                        .complete(prompt, ctx.temps.generation)
                        .await
                        .map_err(|e| {
                            RejectionReason::from(StageFailure::new(Stage::Generate, &e))
                        })?;
                    let text = prompts::parse_idea_text(&completion).map_err(|e| {
                        RejectionReason::from(StageFailure::new(Stage::Generate, &e))
                    })?;
                    ctx.report(Stage::Generate, variation);
                    Ok(Idea::new(text, ctx.temps.generation))
                })
                .await
            }));
        }

        let mut slots = Vec::with_capacity(count);
        for (variation, handle) in handles.into_iter().enumerate() {
            let slot = match handle.await {
                Ok(Ok(idea)) => {
                    debug!(slot = variation, state = %IdeaState::Generated, "idea generated");
                    Slot::Alive(idea)
                }
                Ok(Err(reason)) => {
                    warn!(slot = variation, %reason, "generation slot rejected");
                    Slot::Dead {
                        idea: Idea::new("", ctx.temps.generation),
                        reason,
                    }
                }
                Err(join_error) => Slot::Dead {
                    idea: Idea::new("", ctx.temps.generation),
                    reason: RejectionReason::StageFailed {
                        stage: Stage::Generate,
                        detail: format!("generation task failed: {join_error}"),
                    },
                },
            };
            slots.push(slot);
        }
        slots
    }

    /// Exact-hash dedup first, then token-overlap near-duplicate removal.
    /// The earlier slot always wins; later duplicates are rejected.
    fn apply_novelty_filter(&self, slots: &mut [Slot]) {
        let mut seen_hashes: HashMap<String, String> = HashMap::new();
        let mut kept_texts: Vec<String> = Vec::new();

        for slot in slots.iter_mut() {
            let Slot::Alive(idea) = slot else { continue };

            let hash = similarity::content_hash(&idea.text);
            if let Some(original) = seen_hashes.get(&hash) {
                debug!(duplicate = %idea.text, "novelty filter removed exact duplicate");
                *slot = Slot::Dead {
                    idea: idea.clone(),
                    reason: RejectionReason::Duplicate {
                        similar_to: original.clone(),
                    },
                };
                continue;
            }

            let near = kept_texts
                .iter()
                .find(|kept| {
                    similarity::jaccard(kept, &idea.text) >= self.options.novelty_threshold
                })
                .cloned();
            if let Some(original) = near {
                debug!(duplicate = %idea.text, original = %original, "novelty filter removed near duplicate");
                *slot = Slot::Dead {
                    idea: idea.clone(),
                    reason: RejectionReason::Duplicate {
                        similar_to: original,
                    },
                };
                continue;
            }

            seen_hashes.insert(hash, idea.text.clone());
            kept_texts.push(idea.text.clone());
        }
    }

    /// Critique every surviving slot concurrently. Failures turn the slot
    /// dead; successes come back as `(slot_index, idea, evaluation)`.
    async fn critique_candidates(
        &self,
        ctx: &StageCtx,
        slots: &mut [Slot],
    ) -> Vec<(usize, Idea, Evaluation)> {
        let alive: Vec<(usize, Idea)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Alive(idea) => Some((i, idea.clone())),
                Slot::Dead { .. } => None,
            })
            .collect();

        let parallelism = self
            .options
            .max_parallelism
            .unwrap_or(alive.len().clamp(1, MAX_IDEA_PARALLELISM));
        let semaphore = Arc::new(Semaphore::new(parallelism));

        let mut handles = Vec::with_capacity(alive.len());
        for (index, idea) in alive {
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push((
                index,
                idea.clone(),
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    with_deadline(ctx.deadline_at, async {
                        critique_stage(&ctx, &idea, index, Stage::Critique)
                            .await
                            .map_err(RejectionReason::from)
                    })
                    .await
                }),
            ));
        }

        let mut critiqued = Vec::new();
        for (index, idea, handle) in handles {
            match handle.await {
                Ok(Ok(evaluation)) => {
                    debug!(slot = index, state = %IdeaState::Critiqued, score = evaluation.score, "idea critiqued");
                    critiqued.push((index, idea, evaluation));
                }
                Ok(Err(reason)) => {
                    warn!(slot = index, %reason, "critique rejected idea");
                    slots[index] = Slot::Dead { idea, reason };
                }
                Err(join_error) => {
                    slots[index] = Slot::Dead {
                        idea,
                        reason: RejectionReason::StageFailed {
                            stage: Stage::Critique,
                            detail: format!("critique task failed: {join_error}"),
                        },
                    };
                }
            }
        }
        critiqued
    }
}

/// Sort by score descending (slot order breaking ties) and keep the top K.
/// Ideas cut here are not errors and do not appear in the results.
fn rank_candidates(
    mut critiqued: Vec<(usize, Idea, Evaluation)>,
    top_k: usize,
) -> Vec<(usize, Idea, Evaluation)> {
    critiqued.sort_by(|a, b| {
        b.2.score
            .partial_cmp(&a.2.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    critiqued.truncate(top_k.min(MAX_TOP_CANDIDATES));
    critiqued
}

/// Critique (or re-evaluate) one idea, enriched with similar past context
/// when a reasoning engine is attached.
async fn critique_stage(
    ctx: &StageCtx,
    idea: &Idea,
    index: usize,
    stage: Stage,
) -> Result<Evaluation, StageFailure> {
    let context_hint = match &ctx.reasoning {
        Some(engine) => match engine.recall(&idea.text).await {
            Ok(insights) => insights.context_summary,
            Err(error) => {
                warn!(%error, "reasoning recall failed, critiquing unenriched");
                None
            }
        },
        None => None,
    };

    let prompt = prompts::critique_prompt(idea, &ctx.topic, context_hint.as_deref());
    let completion = ctx
        .complete(prompt, ctx.temps.analytical)
        .await
        .map_err(|e| StageFailure::new(stage, &e))?;
    let evaluation =
        prompts::parse_evaluation(&completion).map_err(|e| StageFailure::new(stage, &e))?;

    if let Some(engine) = &ctx.reasoning {
        if let Err(error) = engine
            .record(stage.name(), &idea.text, &evaluation.critique, BTreeMap::new())
            .await
        {
            warn!(%error, "failed to record critique context");
        }
    }

    ctx.report(stage, index);
    Ok(evaluation)
}

async fn advocate_stage(
    ctx: &StageCtx,
    idea: &Idea,
    critique: &Evaluation,
    index: usize,
) -> Result<Advocacy, StageFailure> {
    let prompt = prompts::advocacy_prompt(idea, critique);
    let completion = ctx
        .complete(prompt, ctx.temps.balanced)
        .await
        .map_err(|e| StageFailure::new(Stage::Advocate, &e))?;
    let advocacy =
        prompts::parse_advocacy(&completion).map_err(|e| StageFailure::new(Stage::Advocate, &e))?;
    ctx.report(Stage::Advocate, index);
    Ok(advocacy)
}

async fn skeptic_stage(
    ctx: &StageCtx,
    idea: &Idea,
    critique: &Evaluation,
    index: usize,
) -> Result<Skepticism, StageFailure> {
    let prompt = prompts::skepticism_prompt(idea, critique);
    let completion = ctx
        .complete(prompt, ctx.temps.balanced)
        .await
        .map_err(|e| StageFailure::new(Stage::Skeptic, &e))?;
    let skepticism = prompts::parse_skepticism(&completion)
        .map_err(|e| StageFailure::new(Stage::Skeptic, &e))?;
    ctx.report(Stage::Skeptic, index);
    Ok(skepticism)
}

/// Synthesize the debate into a revised idea.
async fn improve_stage(
    ctx: &StageCtx,
    idea: &Idea,
    critique: &Evaluation,
    advocacy: &Advocacy,
    skepticism: &Skepticism,
    index: usize,
) -> Result<Idea, StageFailure> {
    let context_hint = match &ctx.reasoning {
        Some(engine) => match engine.recall(&idea.text).await {
            Ok(insights) => insights.context_summary,
            Err(error) => {
                warn!(%error, "reasoning recall failed, improving unenriched");
                None
            }
        },
        None => None,
    };

    let prompt =
        prompts::improvement_prompt(idea, critique, advocacy, skepticism, context_hint.as_deref());
    let completion = ctx
        .complete(prompt, ctx.temps.balanced)
        .await
        .map_err(|e| StageFailure::new(Stage::Improve, &e))?;
    let text =
        prompts::parse_idea_text(&completion).map_err(|e| StageFailure::new(Stage::Improve, &e))?;

    if let Some(engine) = &ctx.reasoning {
        if let Err(error) = engine
            .record(Stage::Improve.name(), &idea.text, &text, BTreeMap::new())
            .await
        {
            warn!(%error, "failed to record improvement context");
        }
    }

    ctx.report(Stage::Improve, index);
    Ok(Idea::new(text, ctx.temps.balanced))
}

/// The post-ranking pipeline for one idea: advocate and skeptic in
/// parallel, then improve, then re-evaluate, then optional enrichment.
async fn idea_pipeline(
    ctx: &StageCtx,
    idea: &Idea,
    initial_evaluation: Evaluation,
    index: usize,
) -> Result<CompletedIdea, RejectionReason> {
    // Independent reads, disjoint writes: safe to run concurrently.
    let (advocacy, skepticism) = tokio::join!(
        advocate_stage(ctx, idea, &initial_evaluation, index),
        skeptic_stage(ctx, idea, &initial_evaluation, index),
    );
    let advocacy = advocacy.map_err(RejectionReason::from)?;
    debug!(slot = index, state = %IdeaState::Advocated, "advocacy complete");
    let skepticism = skepticism.map_err(RejectionReason::from)?;
    debug!(slot = index, state = %IdeaState::Skepticized, "skepticism complete");

    let improved_idea = improve_stage(ctx, idea, &initial_evaluation, &advocacy, &skepticism, index)
        .await
        .map_err(RejectionReason::from)?;
    debug!(slot = index, state = %IdeaState::Improved, "improvement complete");

    let improved_evaluation = critique_stage(ctx, &improved_idea, index, Stage::ReEvaluate)
        .await
        .map_err(RejectionReason::from)?;
    debug!(slot = index, state = %IdeaState::ReEvaluated, "re-evaluation complete");

    let mut multi_dimensional = None;
    let mut inference = None;
    if let Some(engine) = &ctx.reasoning {
        match engine
            .enrich_idea(ctx.client.as_ref(), &improved_idea, &ctx.topic)
            .await
        {
            Ok(enrichment) => {
                multi_dimensional = enrichment.multi_dimensional;
                inference = enrichment.inference;
            }
            Err(error) => {
                warn!(slot = index, %error, "idea enrichment failed, shipping unenriched");
            }
        }
    }

    let score_delta = improved_evaluation.score - initial_evaluation.score;
    debug!(slot = index, state = %IdeaState::Done, score_delta, "idea pipeline done");

    Ok(CompletedIdea {
        initial_evaluation,
        advocacy,
        skepticism,
        improved_idea,
        improved_evaluation,
        score_delta,
        multi_dimensional,
        inference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::stub::StubClient;
    use crate::error::CompletionError;
    use crate::reasoning::{ReasoningConfig, ReasoningEngine};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Routes stage prompts to canned replies; critique scores come from
    /// markers in the idea text.
    fn pipeline_stub() -> StubClient {
        StubClient::new(|request| {
            let prompt = request.prompt.to_lowercase();
            if request.schema.is_some() {
                // Multi-dimensional enrichment call: flat sevens.
                let mut obj = serde_json::Map::new();
                for (name, _) in crate::reasoning::evaluator::DEFAULT_DIMENSION_WEIGHTS {
                    obj.insert(
                        name.to_string(),
                        serde_json::json!({"score": 7.0, "reasoning": "flat"}),
                    );
                }
                return Ok(Completion::Structured(serde_json::Value::Object(obj)));
            }
            if prompt.contains("creative idea generator") {
                let variation = prompt
                    .split("variation #")
                    .nth(1)
                    .and_then(|rest| rest.split(';').next())
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let text = match variation {
                    1 => "Alpha irrigation sensor network",
                    2 => "Beta rooftop greenhouse kits",
                    _ => "Gamma community composting hubs",
                };
                return Ok(Completion::Text(text.to_string()));
            }
            if prompt.contains("rigorous critic") {
                let score = if prompt.contains("improved") {
                    "8.0"
                } else if prompt.contains("beta") {
                    "9.0"
                } else if prompt.contains("gamma") {
                    "7.0"
                } else {
                    "5.0"
                };
                return Ok(Completion::Text(format!(
                    "SCORE: {score}\n\nCRITIQUE:\nReasoned assessment.\n\nSTRENGTHS:\n- focused\n\nWEAKNESSES:\n- narrow"
                )));
            }
            // Improvement first: its prompt embeds the advocate and
            // skeptic sections, so the role checks would shadow it.
            if prompt.contains("refining an idea") {
                return Ok(Completion::Text("Improved hybrid proposal".to_string()));
            }
            if prompt.contains("advocate") {
                return Ok(Completion::Text(
                    "ARGUMENT:\nWorth pursuing.\n\nBENEFITS:\n- low cost".to_string(),
                ));
            }
            if prompt.contains("skeptic") {
                return Ok(Completion::Text(
                    "ARGUMENT:\nAdoption is the weak point.\n\nRISKS:\n- maintenance burden"
                        .to_string(),
                ));
            }
            Err(CompletionError::Permanent(format!(
                "unrouted prompt: {}",
                &request.prompt[..60.min(request.prompt.len())]
            )))
        })
    }

    fn coordinator(client: StubClient, options: RunOptions) -> Coordinator {
        Coordinator::new(Arc::new(client), options).unwrap()
    }

    #[tokio::test]
    async fn happy_path_returns_top_k_in_rank_order() {
        let coordinator = coordinator(pipeline_stub(), RunOptions::default());
        let results = coordinator
            .run(RunRequest::new("urban farming", "low budget", 3))
            .await
            .unwrap();

        // Beta (9.0) outranks Gamma (7.0); Alpha (5.0) is cut, not rejected.
        assert_eq!(results.len(), 2);
        assert!(results[0].idea.text.starts_with("Beta"));
        assert!(results[1].idea.text.starts_with("Gamma"));

        for result in &results {
            let completed = result.outcome.completed().expect("idea should complete");
            assert_eq!(completed.improved_idea.text, "Improved hybrid proposal");
            let expected_delta = 8.0 - completed.initial_evaluation.score;
            assert!((completed.score_delta - expected_delta).abs() < 1e-9);
        }
        // Beta went 9.0 -> 8.0: a negative delta is legal.
        let beta = results[0].outcome.completed().unwrap();
        assert!(beta.score_delta < 0.0);
    }

    #[tokio::test]
    async fn generation_failure_rejects_that_slot_only() {
        let failing_variation = "variation #4";
        let inner = pipeline_stub();
        let client = StubClient::new(move |request| {
            if request.prompt.contains(failing_variation) {
                return Err(CompletionError::Permanent("malformed request".into()));
            }
            // Unique idea per slot so the novelty filter keeps them all.
            if request.prompt.to_lowercase().contains("creative idea generator") {
                let variation = request
                    .prompt
                    .split("variation #")
                    .nth(1)
                    .and_then(|rest| rest.split(';').next())
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                return Ok(Completion::Text(format!(
                    "Distinct proposal number {variation} entirely unlike siblings {variation}{variation}"
                )));
            }
            inner.route(request)
        });

        let coordinator = coordinator(client, RunOptions::default());
        let results = coordinator
            .run(RunRequest::new("energy", "none", 5))
            .await
            .unwrap();

        let completed: Vec<_> = results.iter().filter(|r| r.outcome.is_completed()).collect();
        assert_eq!(completed.len(), 2);

        let rejected: Vec<_> = results
            .iter()
            .filter_map(|r| match &r.outcome {
                crate::types::IdeaOutcome::Rejected { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(rejected.len(), 1);
        assert!(matches!(
            *rejected[0],
            RejectionReason::StageFailed {
                stage: Stage::Generate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn novelty_filter_rejects_near_duplicates_before_critique() {
        let critique_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&critique_calls);
        let client = StubClient::new(move |request| {
            let prompt = request.prompt.to_lowercase();
            if prompt.contains("creative idea generator") {
                let text = if prompt.contains("variation #1") {
                    "Build a solar charger"
                } else {
                    "Build a solar-powered charger"
                };
                return Ok(Completion::Text(text.to_string()));
            }
            if prompt.contains("rigorous critic") {
                calls.fetch_add(1, Ordering::SeqCst);
                return Ok(Completion::Text(
                    "SCORE: 7\n\nCRITIQUE:\nFine.".to_string(),
                ));
            }
            if prompt.contains("refining an idea") {
                return Ok(Completion::Text("Improved charger".to_string()));
            }
            if prompt.contains("advocate") {
                return Ok(Completion::Text("ARGUMENT:\nYes.".to_string()));
            }
            if prompt.contains("skeptic") {
                return Ok(Completion::Text("ARGUMENT:\nNo.".to_string()));
            }
            Err(CompletionError::Permanent("unrouted".into()))
        });

        let coordinator = coordinator(client, RunOptions::default());
        let results = coordinator
            .run(RunRequest::new("chargers", "", 2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].outcome.is_completed());
        match &results[1].outcome {
            crate::types::IdeaOutcome::Rejected {
                reason: RejectionReason::Duplicate { similar_to },
            } => assert_eq!(similar_to, "Build a solar charger"),
            other => panic!("expected duplicate rejection, got {other:?}"),
        }

        // The duplicate never reached critique; only the survivor and its
        // improved version were critiqued.
        assert_eq!(critique_calls.load(Ordering::SeqCst), 2);
    }

    /// Client whose improvement stage hangs long enough to blow a deadline.
    struct SlowImprover {
        inner: StubClient,
    }

    #[async_trait]
    impl TextCompletionClient for SlowImprover {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<Completion, CompletionError> {
            if request.prompt.contains("refining an idea") {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            self.inner.complete(request).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_rejects_unfinished_ideas_with_timeout() {
        let client = SlowImprover {
            inner: pipeline_stub(),
        };
        let coordinator = Coordinator::new(
            Arc::new(client),
            RunOptions {
                deadline: Some(Duration::from_secs(30)),
                ..RunOptions::default()
            },
        )
        .unwrap();

        let results = coordinator
            .run(RunRequest::new("urban farming", "low budget", 3))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(matches!(
                result.outcome,
                crate::types::IdeaOutcome::Rejected {
                    reason: RejectionReason::Timeout
                }
            ));
        }
    }

    #[tokio::test]
    async fn progress_callback_fires_at_stage_boundaries() {
        let seen: Arc<Mutex<Vec<(Stage, usize, f64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback =
            Arc::new(move |stage, index, fraction| sink.lock().unwrap().push((stage, index, fraction)));

        let coordinator =
            coordinator(pipeline_stub(), RunOptions::default()).with_progress(callback);
        coordinator
            .run(RunRequest::new("urban farming", "low budget", 3))
            .await
            .unwrap();

        let events = seen.lock().unwrap();
        for stage in Stage::PIPELINE {
            assert!(
                events.iter().any(|(s, _, _)| *s == stage),
                "no progress event for {stage}"
            );
        }
        for (_, _, fraction) in events.iter() {
            assert!((0.0..=1.0).contains(fraction));
        }
    }

    #[tokio::test]
    async fn enhanced_reasoning_attaches_enrichment_and_records_context() {
        let engine = Arc::new(
            ReasoningEngine::new(ReasoningConfig {
                logical_inference: true,
                multi_dimensional_eval: true,
                ..ReasoningConfig::default()
            })
            .unwrap(),
        );

        let coordinator = coordinator(
            pipeline_stub(),
            RunOptions {
                enhanced_reasoning: true,
                ..RunOptions::default()
            },
        )
        .with_reasoning(Arc::clone(&engine));

        let results = coordinator
            .run(RunRequest::new("urban farming", "low budget", 3))
            .await
            .unwrap();

        let completed = results[0].outcome.completed().unwrap();
        let multi = completed.multi_dimensional.as_ref().expect("enrichment");
        assert!((multi.overall_score - 7.0).abs() < 1e-9);
        let (lower, upper) = multi.confidence_interval;
        assert!(lower <= multi.overall_score && multi.overall_score <= upper);

        // Critique and improvement interactions were recorded.
        assert!(!engine.memory().read().await.is_empty());
        let flow = engine.tracker().read().await.analyze_flow();
        assert!(flow.agent_sequence.iter().any(|a| a == "critique"));
        assert!(flow.agent_sequence.iter().any(|a| a == "improve"));
    }

    #[tokio::test]
    async fn reasoning_failure_degrades_gracefully() {
        // Engine whose multi-dim calls fail permanently: ideas still
        // complete, just without attachments.
        let engine = Arc::new(ReasoningEngine::new(ReasoningConfig::default()).unwrap());
        let inner = pipeline_stub();
        let client = StubClient::new(move |request| {
            if request.schema.is_some() {
                return Err(CompletionError::Permanent("no structured output".into()));
            }
            inner.route(request)
        });

        let coordinator = Coordinator::new(
            Arc::new(client),
            RunOptions {
                enhanced_reasoning: true,
                ..RunOptions::default()
            },
        )
        .unwrap()
        .with_reasoning(engine);

        let results = coordinator
            .run(RunRequest::new("urban farming", "low budget", 3))
            .await
            .unwrap();

        let completed = results[0].outcome.completed().unwrap();
        assert!(completed.multi_dimensional.is_none());
    }

    #[test]
    fn invalid_options_fail_fast() {
        let client = || Arc::new(pipeline_stub()) as Arc<dyn TextCompletionClient>;

        assert!(Coordinator::new(
            client(),
            RunOptions {
                num_top_candidates: 0,
                ..RunOptions::default()
            }
        )
        .is_err());

        assert!(Coordinator::new(
            client(),
            RunOptions {
                num_top_candidates: 9,
                ..RunOptions::default()
            }
        )
        .is_err());

        assert!(Coordinator::new(
            client(),
            RunOptions {
                novelty_threshold: 1.5,
                ..RunOptions::default()
            }
        )
        .is_err());

        assert!(Coordinator::new(
            client(),
            RunOptions {
                max_parallelism: Some(0),
                ..RunOptions::default()
            }
        )
        .is_err());
    }

    #[tokio::test]
    async fn zero_candidates_is_a_configuration_error() {
        let coordinator = coordinator(pipeline_stub(), RunOptions::default());
        let err = coordinator
            .run(RunRequest::new("topic", "", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }
}
