//! Enhanced reasoning engine.
//!
//! Composes four capabilities behind one facade: a bounded context memory
//! with similarity search, an append-only conversation tracker, a
//! rule-based logical inference engine, and a weighted multi-dimensional
//! evaluator. The coordinator calls the facade around critique and
//! improvement; any failure in here surfaces as a single
//! [`ReasoningError`] that the caller logs and survives - enrichment is
//! never load-bearing for the pipeline.
//!
//! The memory and tracker are shared, lock-guarded stores constructed once
//! per run and injected by reference. The engine never copies their state.

pub mod context_memory;
pub mod conversation;
pub mod evaluator;
pub mod inference;

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::client::TextCompletionClient;
use crate::error::{ConfigurationError, ReasoningError};
use crate::similarity::DEFAULT_SIMILARITY_THRESHOLD;
use crate::types::Idea;

use context_memory::{ContextMatch, ContextMemory, DEFAULT_MEMORY_CAPACITY};
use conversation::ConversationTracker;
use evaluator::{EvaluatorConfig, MultiDimEvaluation, MultiDimensionalEvaluator};
use inference::{split_premises, InferenceChain, InferenceConfig, LogicalInference};

/// Feature toggles and knobs for the reasoning layer.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub multi_dimensional_eval: bool,
    pub logical_inference: bool,
    pub memory_capacity: usize,
    pub inference: InferenceConfig,
    pub evaluator: EvaluatorConfig,
    /// How many similar past interactions feed one context summary.
    pub max_context_matches: usize,
    pub similarity_threshold: f64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            multi_dimensional_eval: true,
            logical_inference: true,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            inference: InferenceConfig::default(),
            evaluator: EvaluatorConfig::default(),
            max_context_matches: 3,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl ReasoningConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.memory_capacity == 0 {
            return Err(ConfigurationError::ZeroMemoryCapacity);
        }
        if self.inference.max_depth == 0 {
            return Err(ConfigurationError::ZeroInferenceDepth);
        }
        Ok(())
    }
}

/// What the engine knows about a query from past interactions.
#[derive(Debug, Clone)]
pub struct ContextInsights {
    pub related: Vec<ContextMatch>,
    /// Prompt-ready digest of the related interactions, `None` when the
    /// memory had nothing relevant.
    pub context_summary: Option<String>,
}

/// Optional attachments for a completed idea.
#[derive(Debug, Clone, Default)]
pub struct IdeaEnrichment {
    pub multi_dimensional: Option<MultiDimEvaluation>,
    pub inference: Option<InferenceChain>,
}

/// Facade over context memory, conversation tracking, inference, and
/// multi-dimensional evaluation.
pub struct ReasoningEngine {
    config: ReasoningConfig,
    memory: Arc<RwLock<ContextMemory>>,
    tracker: Arc<RwLock<ConversationTracker>>,
    inference: LogicalInference,
    evaluator: MultiDimensionalEvaluator,
}

impl ReasoningEngine {
    /// Engine owning fresh stores. One per run/session, not process-wide.
    pub fn new(config: ReasoningConfig) -> Result<Self, ConfigurationError> {
        let memory = Arc::new(RwLock::new(ContextMemory::new(config.memory_capacity)));
        let tracker = Arc::new(RwLock::new(ConversationTracker::new()));
        Self::with_shared(config, memory, tracker)
    }

    /// Engine over stores the caller owns and may share elsewhere.
    pub fn with_shared(
        config: ReasoningConfig,
        memory: Arc<RwLock<ContextMemory>>,
        tracker: Arc<RwLock<ConversationTracker>>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            inference: LogicalInference::new(config.inference.clone()),
            evaluator: MultiDimensionalEvaluator::new(config.evaluator.clone()),
            config,
            memory,
            tracker,
        })
    }

    pub fn memory(&self) -> Arc<RwLock<ContextMemory>> {
        Arc::clone(&self.memory)
    }

    pub fn tracker(&self) -> Arc<RwLock<ConversationTracker>> {
        Arc::clone(&self.tracker)
    }

    pub fn inference(&self) -> &LogicalInference {
        &self.inference
    }

    pub fn evaluator(&self) -> &MultiDimensionalEvaluator {
        &self.evaluator
    }

    /// Look up interactions similar to `query` without recording anything.
    pub async fn recall(&self, query: &str) -> Result<ContextInsights, ReasoningError> {
        let related = {
            let memory = self.memory.read().await;
            let mut matches = memory.find_similar(query, self.config.similarity_threshold);
            matches.truncate(self.config.max_context_matches);
            matches
        };
        let context_summary = summarize_matches(&related);
        Ok(ContextInsights {
            related,
            context_summary,
        })
    }

    /// Record one interaction into both shared stores.
    pub async fn record(
        &self,
        agent: &str,
        input: &str,
        output: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<u64, ReasoningError> {
        let id = {
            let mut memory = self.memory.write().await;
            memory.store(agent, input, output, metadata.clone())
        };
        {
            let mut tracker = self.tracker.write().await;
            tracker.add_interaction(agent, input, output, metadata);
        }
        Ok(id)
    }

    /// Context-aware processing around one stage: recall what is relevant
    /// to `input`, then record the interaction.
    pub async fn process_with_context(
        &self,
        agent: &str,
        input: &str,
        output: &str,
    ) -> Result<ContextInsights, ReasoningError> {
        let insights = self.recall(input).await?;
        self.record(agent, input, output, BTreeMap::new()).await?;
        Ok(insights)
    }

    /// Optional attachments for a completed idea, per the feature toggles.
    pub async fn enrich_idea(
        &self,
        client: &dyn TextCompletionClient,
        idea: &Idea,
        context: &str,
    ) -> Result<IdeaEnrichment, ReasoningError> {
        let multi_dimensional = if self.config.multi_dimensional_eval {
            Some(self.evaluator.evaluate(client, idea, context).await?)
        } else {
            None
        };

        let inference = if self.config.logical_inference {
            let chain = self.inference.build_chain(&split_premises(&idea.text));
            (!chain.steps.is_empty()).then_some(chain)
        } else {
            None
        };

        Ok(IdeaEnrichment {
            multi_dimensional,
            inference,
        })
    }
}

/// Prompt-ready digest of similar past interactions.
fn summarize_matches(matches: &[ContextMatch]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let lines: Vec<String> = matches
        .iter()
        .map(|m| {
            let gist = if m.record.output_text.is_empty() {
                &m.record.input_text
            } else {
                &m.record.output_text
            };
            format!("- [{}] {}", m.record.agent, gist)
        })
        .collect();
    Some(lines.join("\n"))
}
