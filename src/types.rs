//! Core types for the ideaforge evaluation pipeline.
//!
//! Every stage payload is a concrete struct validated at the completion
//! client boundary. Malformed or missing fields fail the affected stage
//! immediately instead of leaking half-parsed data downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StageFailure;
use crate::reasoning::evaluator::MultiDimEvaluation;
use crate::reasoning::inference::InferenceChain;

/// A candidate response to a topic/constraint pair.
///
/// Immutable once produced by the generation stage; improvement creates a
/// new `Idea` rather than mutating the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub text: String,
    /// Sampling temperature the idea was generated at.
    pub generation_temperature: f64,
}

impl Idea {
    pub fn new(text: impl Into<String>, generation_temperature: f64) -> Self {
        Self {
            text: text.into(),
            generation_temperature,
        }
    }
}

/// One role in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Critique,
    Advocate,
    Skeptic,
    Improve,
    ReEvaluate,
}

impl Stage {
    /// Full pipeline, in execution order. Advocate and Skeptic run
    /// concurrently but are reported as separate boundaries.
    pub const PIPELINE: [Stage; 6] = [
        Stage::Generate,
        Stage::Critique,
        Stage::Advocate,
        Stage::Skeptic,
        Stage::Improve,
        Stage::ReEvaluate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Critique => "critique",
            Stage::Advocate => "advocate",
            Stage::Skeptic => "skeptic",
            Stage::Improve => "improve",
            Stage::ReEvaluate => "re_evaluate",
        }
    }

    /// Fraction of the per-idea pipeline complete once this stage finishes.
    pub fn fraction_complete(&self) -> f64 {
        let idx = Stage::PIPELINE
            .iter()
            .position(|s| s == self)
            .unwrap_or(Stage::PIPELINE.len() - 1);
        (idx + 1) as f64 / Stage::PIPELINE.len() as f64
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-idea pipeline state.
///
/// `Rejected` is terminal and reachable from `Generated` (novelty filter)
/// or from any stage on unrecoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaState {
    Generated,
    Critiqued,
    Advocated,
    Skepticized,
    Improved,
    ReEvaluated,
    Done,
    Rejected,
}

impl fmt::Display for IdeaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdeaState::Generated => "generated",
            IdeaState::Critiqued => "critiqued",
            IdeaState::Advocated => "advocated",
            IdeaState::Skepticized => "skepticized",
            IdeaState::Improved => "improved",
            IdeaState::ReEvaluated => "re_evaluated",
            IdeaState::Done => "done",
            IdeaState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// A critique of one idea at one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Overall quality score, 0..=10.
    pub score: f64,
    pub critique: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// The advocate's case for an idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advocacy {
    pub argument: String,
    #[serde(default)]
    pub key_benefits: Vec<String>,
}

/// The skeptic's case against an idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skepticism {
    pub argument: String,
    #[serde(default)]
    pub key_risks: Vec<String>,
}

/// Why an idea left the pipeline without completing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Removed by the novelty filter as an exact or near duplicate.
    Duplicate { similar_to: String },
    /// A stage failed permanently or exhausted its retries.
    StageFailed { stage: Stage, detail: String },
    /// The run deadline expired before the idea reached `Done`.
    Timeout,
}

impl From<StageFailure> for RejectionReason {
    fn from(failure: StageFailure) -> Self {
        RejectionReason::StageFailed {
            stage: failure.stage,
            detail: failure.detail,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Duplicate { similar_to } => {
                write!(f, "near-duplicate of \"{similar_to}\"")
            }
            RejectionReason::StageFailed { stage, detail } => {
                write!(f, "{stage} stage failed: {detail}")
            }
            RejectionReason::Timeout => f.write_str("run deadline expired"),
        }
    }
}

/// Everything the pipeline produced for one idea that reached `Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedIdea {
    pub initial_evaluation: Evaluation,
    pub advocacy: Advocacy,
    pub skepticism: Skepticism,
    pub improved_idea: Idea,
    pub improved_evaluation: Evaluation,
    /// `improved - initial`; negative when improvement made things worse.
    pub score_delta: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_dimensional: Option<MultiDimEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference: Option<InferenceChain>,
}

/// Terminal outcome for one idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IdeaOutcome {
    Completed(CompletedIdea),
    Rejected { reason: RejectionReason },
}

impl IdeaOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, IdeaOutcome::Completed(_))
    }

    pub fn completed(&self) -> Option<&CompletedIdea> {
        match self {
            IdeaOutcome::Completed(c) => Some(c),
            IdeaOutcome::Rejected { .. } => None,
        }
    }
}

/// One idea's result from a coordinator run.
///
/// Rejected ideas keep their original text and a reason so callers can
/// render partial results instead of an all-or-nothing failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub idea: Idea,
    pub outcome: IdeaOutcome,
    pub created_at: DateTime<Utc>,
}

impl WorkflowResult {
    pub fn completed(idea: Idea, completed: CompletedIdea) -> Self {
        Self {
            idea,
            outcome: IdeaOutcome::Completed(completed),
            created_at: Utc::now(),
        }
    }

    pub fn rejected(idea: Idea, reason: RejectionReason) -> Self {
        Self {
            idea,
            outcome: IdeaOutcome::Rejected { reason },
            created_at: Utc::now(),
        }
    }
}

/// Aggregate view of one run, for host-side reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub completed: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub mean_score_delta: f64,
}

impl RunSummary {
    pub fn from_results(results: &[WorkflowResult]) -> Self {
        let mut completed = 0;
        let mut rejected = 0;
        let mut duplicates = 0;
        let mut deltas = Vec::new();

        for result in results {
            match &result.outcome {
                IdeaOutcome::Completed(c) => {
                    completed += 1;
                    deltas.push(c.score_delta);
                }
                IdeaOutcome::Rejected { reason } => {
                    rejected += 1;
                    if matches!(reason, RejectionReason::Duplicate { .. }) {
                        duplicates += 1;
                    }
                }
            }
        }

        let mean_score_delta = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().sum::<f64>() / deltas.len() as f64
        };

        Self {
            completed,
            rejected,
            duplicates,
            mean_score_delta,
        }
    }
}

/// Named temperature preset covering all three stage classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperaturePreset {
    Conservative,
    #[default]
    Balanced,
    Creative,
    Wild,
}

/// Per-stage-class sampling temperatures.
///
/// Generation runs hot for diversity, critique and re-evaluation run cold
/// for consistency, advocacy/skepticism/improvement sit in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTemperatures {
    pub generation: f64,
    pub analytical: f64,
    pub balanced: f64,
}

impl From<TemperaturePreset> for StageTemperatures {
    fn from(preset: TemperaturePreset) -> Self {
        match preset {
            TemperaturePreset::Conservative => StageTemperatures {
                generation: 0.5,
                analytical: 0.2,
                balanced: 0.4,
            },
            TemperaturePreset::Balanced => StageTemperatures {
                generation: 0.9,
                analytical: 0.3,
                balanced: 0.5,
            },
            TemperaturePreset::Creative => StageTemperatures {
                generation: 1.1,
                analytical: 0.3,
                balanced: 0.6,
            },
            TemperaturePreset::Wild => StageTemperatures {
                generation: 1.3,
                analytical: 0.4,
                balanced: 0.7,
            },
        }
    }
}

impl StageTemperatures {
    /// Temperature for a given stage.
    pub fn for_stage(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Generate => self.generation,
            Stage::Critique | Stage::ReEvaluate => self.analytical,
            Stage::Advocate | Stage::Skeptic | Stage::Improve => self.balanced,
        }
    }
}

/// Either a named preset or explicit per-stage temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemperaturePolicy {
    Preset(TemperaturePreset),
    Explicit(StageTemperatures),
}

impl Default for TemperaturePolicy {
    fn default() -> Self {
        TemperaturePolicy::Preset(TemperaturePreset::Balanced)
    }
}

impl TemperaturePolicy {
    pub fn resolve(&self) -> StageTemperatures {
        match self {
            TemperaturePolicy::Preset(p) => (*p).into(),
            TemperaturePolicy::Explicit(t) => *t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_fractions_are_monotonic_and_end_at_one() {
        let fractions: Vec<f64> = Stage::PIPELINE
            .iter()
            .map(|s| s.fraction_complete())
            .collect();
        for pair in fractions.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!((fractions.last().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn presets_keep_generation_hotter_than_analysis() {
        for preset in [
            TemperaturePreset::Conservative,
            TemperaturePreset::Balanced,
            TemperaturePreset::Creative,
            TemperaturePreset::Wild,
        ] {
            let temps = StageTemperatures::from(preset);
            assert!(temps.generation > temps.analytical);
            assert!(temps.balanced >= temps.analytical);
        }
    }

    #[test]
    fn explicit_policy_wins_over_preset_mapping() {
        let explicit = StageTemperatures {
            generation: 1.0,
            analytical: 0.1,
            balanced: 0.2,
        };
        let policy = TemperaturePolicy::Explicit(explicit);
        assert_eq!(policy.resolve(), explicit);
        assert_eq!(policy.resolve().for_stage(Stage::Critique), 0.1);
        assert_eq!(policy.resolve().for_stage(Stage::ReEvaluate), 0.1);
    }

    #[test]
    fn run_summary_counts_outcomes() {
        let completed = WorkflowResult::completed(
            Idea::new("a", 0.9),
            CompletedIdea {
                initial_evaluation: Evaluation {
                    score: 6.0,
                    critique: "ok".into(),
                    strengths: vec![],
                    weaknesses: vec![],
                },
                advocacy: Advocacy {
                    argument: "yes".into(),
                    key_benefits: vec![],
                },
                skepticism: Skepticism {
                    argument: "no".into(),
                    key_risks: vec![],
                },
                improved_idea: Idea::new("a'", 0.5),
                improved_evaluation: Evaluation {
                    score: 8.0,
                    critique: "better".into(),
                    strengths: vec![],
                    weaknesses: vec![],
                },
                score_delta: 2.0,
                multi_dimensional: None,
                inference: None,
            },
        );
        let duplicate = WorkflowResult::rejected(
            Idea::new("a again", 0.9),
            RejectionReason::Duplicate {
                similar_to: "a".into(),
            },
        );
        let timed_out = WorkflowResult::rejected(Idea::new("b", 0.9), RejectionReason::Timeout);

        let summary = RunSummary::from_results(&[completed, duplicate, timed_out]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.duplicates, 1);
        assert!((summary.mean_score_delta - 2.0).abs() < 1e-9);
    }
}
