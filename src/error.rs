//! Error taxonomy for the evaluation pipeline.
//!
//! Four failure classes, each with a different blast radius:
//! - [`CompletionError::Transient`] - retried with backoff
//! - [`CompletionError::Permanent`] - fails one stage of one idea
//! - [`ReasoningError`] - caught at the reasoning facade; pipeline continues unenriched
//! - [`ConfigurationError`] - rejected before any network call
//!
//! Errors never cross idea boundaries: one idea's permanent failure does not
//! affect its siblings.

use crate::types::Stage;

/// Failure from a text completion call.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// Network hiccup, rate limit, upstream overload. Safe to retry.
    #[error("transient completion failure: {0}")]
    Transient(String),

    /// Malformed prompt, schema mismatch, invalid response shape.
    /// Retrying will not help.
    #[error("permanent completion failure: {0}")]
    Permanent(String),
}

impl CompletionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionError::Transient(_))
    }

    /// Tag a parse/validation failure as permanent.
    pub fn malformed(detail: impl Into<String>) -> Self {
        CompletionError::Permanent(detail.into())
    }
}

/// Invalid configuration, caught before the pipeline spends anything.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("num_top_candidates must be within 1..=5, got {0}")]
    TopCandidatesOutOfRange(usize),

    #[error("num_candidates must be at least 1")]
    NoCandidates,

    #[error("novelty_threshold must be within 0.0..=1.0, got {0}")]
    NoveltyThresholdOutOfRange(f64),

    #[error("temperature for the {stage} stage must be within 0.0..=2.0, got {value}")]
    TemperatureOutOfRange { stage: &'static str, value: f64 },

    #[error("dimension weights sum to {0}, expected 1.0")]
    WeightSum(f64),

    #[error("dimension weight set has zero total weight")]
    ZeroTotalWeight,

    #[error("dimension weight for '{dimension}' is negative: {weight}")]
    NegativeWeight { dimension: String, weight: f64 },

    #[error("dimension weight set is empty")]
    EmptyWeights,

    #[error("memory_capacity must be at least 1")]
    ZeroMemoryCapacity,

    #[error("inference_depth must be at least 1")]
    ZeroInferenceDepth,

    #[error("max_parallelism must be at least 1 when set")]
    ZeroParallelism,
}

/// Any failure inside the reasoning subsystem. Callers log and continue
/// with the unenriched result rather than failing the idea.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("multi-dimensional evaluation failed: {0}")]
    Evaluation(#[from] CompletionError),

    #[error("reasoning engine failure: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error surfaced from [`Coordinator::run`](crate::coordinator::Coordinator::run).
///
/// Per-idea failures are reported inside the result list as
/// [`Rejected`](crate::types::IdeaOutcome::Rejected) entries, so the only
/// whole-run failure is bad configuration.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),
}

/// Where in the pipeline a stage failure happened, for rejection reporting.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: Stage,
    pub detail: String,
}

impl StageFailure {
    pub fn new(stage: Stage, error: &CompletionError) -> Self {
        Self {
            stage,
            detail: error.to_string(),
        }
    }
}
