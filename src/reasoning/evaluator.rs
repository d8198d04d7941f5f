//! Weighted multi-criteria idea scoring with confidence bounds.
//!
//! One structured completion call per idea scores every configured
//! dimension at once (per-dimension calls would multiply cost by seven).
//! The overall score is the weight-blended mean; the confidence interval
//! is `overall ± stddev(dimension scores) * z` with a fixed z factor - a
//! deterministic spread heuristic, wider when the dimensions disagree,
//! not a statistical guarantee.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::client::{
    complete_with_retry, Completion, CompletionRequest, RetryPolicy, TextCompletionClient,
};
use crate::error::{CompletionError, ConfigurationError};
use crate::types::Idea;

/// Default dimension set. Weights sum to 1.0.
pub const DEFAULT_DIMENSION_WEIGHTS: [(&str, f64); 7] = [
    ("feasibility", 0.20),
    ("innovation", 0.15),
    ("impact", 0.20),
    ("cost_effectiveness", 0.15),
    ("scalability", 0.10),
    ("risk_assessment", 0.10),
    ("timeline", 0.10),
];

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Score and rationale for one dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    /// 0..=10.
    pub score: f64,
    pub reasoning: String,
}

/// Exactly the configured dimension keys, each scored.
pub type DimensionScoreSet = BTreeMap<String, DimensionScore>;

/// Full multi-criteria evaluation of one idea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiDimEvaluation {
    pub dimension_scores: DimensionScoreSet,
    /// Weighted mean of the dimension scores.
    pub overall_score: f64,
    /// `(lower, upper)` with `lower <= overall_score <= upper`.
    pub confidence_interval: (f64, f64),
}

impl MultiDimEvaluation {
    /// Narrower means the dimensions agreed more.
    pub fn interval_width(&self) -> f64 {
        self.confidence_interval.1 - self.confidence_interval.0
    }
}

/// Validated dimension weight set. Always sums to 1.0 once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionWeights {
    weights: BTreeMap<String, f64>,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            weights: DEFAULT_DIMENSION_WEIGHTS
                .iter()
                .map(|(name, w)| (name.to_string(), *w))
                .collect(),
        }
    }
}

impl DimensionWeights {
    /// Accept a weight set that already sums to 1.0 (± 1e-6).
    ///
    /// Zero weights on individual dimensions are fine; a zero or off-unit
    /// total is a configuration error.
    pub fn new(weights: BTreeMap<String, f64>) -> Result<Self, ConfigurationError> {
        Self::validate_entries(&weights)?;
        let total: f64 = weights.values().sum();
        if total.abs() < WEIGHT_SUM_TOLERANCE {
            return Err(ConfigurationError::ZeroTotalWeight);
        }
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigurationError::WeightSum(total));
        }
        Ok(Self { weights })
    }

    /// Rescale any positive total to 1.0.
    pub fn normalized(weights: BTreeMap<String, f64>) -> Result<Self, ConfigurationError> {
        Self::validate_entries(&weights)?;
        let total: f64 = weights.values().sum();
        if total.abs() < WEIGHT_SUM_TOLERANCE {
            return Err(ConfigurationError::ZeroTotalWeight);
        }
        Ok(Self {
            weights: weights.into_iter().map(|(k, w)| (k, w / total)).collect(),
        })
    }

    fn validate_entries(weights: &BTreeMap<String, f64>) -> Result<(), ConfigurationError> {
        if weights.is_empty() {
            return Err(ConfigurationError::EmptyWeights);
        }
        for (dimension, weight) in weights {
            if *weight < 0.0 {
                return Err(ConfigurationError::NegativeWeight {
                    dimension: dimension.clone(),
                    weight: *weight,
                });
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.weights.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.weights.keys()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Evaluator knobs. `z_factor` controls interval width per unit of
/// dimension-score spread.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub weights: DimensionWeights,
    pub z_factor: f64,
    pub temperature: f64,
    pub retry: RetryPolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            z_factor: 0.5,
            temperature: 0.3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Scores ideas across the configured dimension set.
#[derive(Debug, Clone, Default)]
pub struct MultiDimensionalEvaluator {
    config: EvaluatorConfig,
}

impl MultiDimensionalEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn weights(&self) -> &DimensionWeights {
        &self.config.weights
    }

    /// Score `idea` across every configured dimension in one call.
    pub async fn evaluate(
        &self,
        client: &dyn TextCompletionClient,
        idea: &Idea,
        context: &str,
    ) -> Result<MultiDimEvaluation, CompletionError> {
        let request = CompletionRequest::structured(
            self.build_prompt(idea, context),
            self.config.temperature,
            self.schema(),
        );
        let completion = complete_with_retry(client, request, &self.config.retry).await?;
        let scores = self.parse_scores(&completion)?;
        Ok(self.summarize(scores))
    }

    /// Rank `ideas` by overall score, narrower interval winning ties.
    pub async fn compare(
        &self,
        client: &dyn TextCompletionClient,
        ideas: &[Idea],
        context: &str,
    ) -> Result<Vec<(Idea, MultiDimEvaluation)>, CompletionError> {
        let mut scored = Vec::with_capacity(ideas.len());
        for idea in ideas {
            let evaluation = self.evaluate(client, idea, context).await?;
            scored.push((idea.clone(), evaluation));
        }
        scored.sort_by(|a, b| {
            b.1.overall_score
                .partial_cmp(&a.1.overall_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.1.interval_width()
                        .partial_cmp(&b.1.interval_width())
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        Ok(scored)
    }

    fn build_prompt(&self, idea: &Idea, context: &str) -> String {
        let dimension_list: String = self
            .config
            .weights
            .iter()
            .map(|(name, weight)| format!("- {name} (weight {weight:.2})"))
            .collect::<Vec<_>>()
            .join("\n");
        let context_block = if context.is_empty() {
            String::new()
        } else {
            format!("\n## Context\n{context}\n")
        };
        format!(
            r#"You are scoring an idea along fixed evaluation dimensions.

## Idea
{idea}
{context_block}
## Dimensions
{dimensions}

Score EVERY dimension from 0 to 10 and give one sentence of reasoning
for each. Be rigorous and honest."#,
            idea = idea.text,
            context_block = context_block,
            dimensions = dimension_list,
        )
    }

    fn schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for name in self.config.weights.names() {
            properties.insert(
                name.clone(),
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "score": {"type": "number", "minimum": 0, "maximum": 10},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["score", "reasoning"]
                }),
            );
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.config.weights.names().collect::<Vec<_>>()
        })
    }

    /// Validate the reply into exactly the configured dimension keys.
    fn parse_scores(&self, completion: &Completion) -> Result<DimensionScoreSet, CompletionError> {
        let mut scores = DimensionScoreSet::new();
        match completion {
            Completion::Structured(value) => {
                for name in self.config.weights.names() {
                    let entry = &value[name];
                    let score = entry["score"].as_f64().ok_or_else(|| {
                        CompletionError::malformed(format!("missing score for dimension {name}"))
                    })?;
                    validate_dimension_score(name, score)?;
                    let reasoning = entry["reasoning"].as_str().unwrap_or_default().to_string();
                    scores.insert(name.clone(), DimensionScore { score, reasoning });
                }
            }
            Completion::Text(text) => {
                // Fallback format, one line per dimension:
                //   feasibility: 7.5 - mostly off-the-shelf parts
                for line in text.lines() {
                    let line = line.trim().trim_start_matches('-').trim();
                    let Some((name, rest)) = line.split_once(':') else {
                        continue;
                    };
                    let name = name.trim().to_lowercase().replace([' ', '-'], "_");
                    if !self.config.weights.names().any(|n| *n == name) {
                        continue;
                    }
                    let rest = rest.trim();
                    let (score_part, reasoning) = match rest.split_once('-') {
                        Some((s, r)) => (s.trim(), r.trim()),
                        None => (rest, ""),
                    };
                    let score: f64 = score_part.parse().map_err(|_| {
                        CompletionError::malformed(format!(
                            "unparseable score for dimension {name}"
                        ))
                    })?;
                    validate_dimension_score(&name, score)?;
                    scores.insert(
                        name,
                        DimensionScore {
                            score,
                            reasoning: reasoning.to_string(),
                        },
                    );
                }
                for name in self.config.weights.names() {
                    if !scores.contains_key(name) {
                        return Err(CompletionError::malformed(format!(
                            "missing score for dimension {name}"
                        )));
                    }
                }
            }
        }
        Ok(scores)
    }

    fn summarize(&self, dimension_scores: DimensionScoreSet) -> MultiDimEvaluation {
        let overall_score: f64 = self
            .config
            .weights
            .iter()
            .map(|(name, weight)| weight * dimension_scores[name].score)
            .sum();

        let values: Vec<f64> = dimension_scores.values().map(|d| d.score).collect();
        let half_width = if values.len() < 2 {
            0.0
        } else {
            values.iter().std_dev() * self.config.z_factor
        };

        MultiDimEvaluation {
            dimension_scores,
            overall_score,
            confidence_interval: (
                (overall_score - half_width).max(0.0),
                (overall_score + half_width).min(10.0),
            ),
        }
    }
}

fn validate_dimension_score(name: &str, score: f64) -> Result<(), CompletionError> {
    if !(0.0..=10.0).contains(&score) || !score.is_finite() {
        return Err(CompletionError::malformed(format!(
            "dimension {name} score {score} outside 0..=10"
        )));
    }
    Ok(())
}
