//! ideaforge - multi-role idea evaluation and refinement
//!
//! Routes free-text ideas through a fixed sequence of reasoning roles -
//! generation, criticism, advocacy, skepticism, improvement - and augments
//! the pipeline with a reasoning layer that remembers conversational
//! context, runs formal logical inference, and scores ideas along weighted
//! dimensions with confidence estimates.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ideaforge::{AnthropicClient, Coordinator, RunOptions, RunRequest};
//! use ideaforge::reasoning::{ReasoningConfig, ReasoningEngine};
//! use std::sync::Arc;
//!
//! let client = Arc::new(AnthropicClient::from_env());
//! let engine = Arc::new(ReasoningEngine::new(ReasoningConfig::default())?);
//!
//! let coordinator = Coordinator::new(client, RunOptions {
//!     enhanced_reasoning: true,
//!     ..RunOptions::default()
//! })?
//! .with_reasoning(engine);
//!
//! let results = coordinator
//!     .run(RunRequest::new("urban farming", "low budget", 5))
//!     .await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Host (CLI / web layer)                │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ run(topic, options)
//!                         ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                     Coordinator                       │
//! │  generate → filter → critique → rank                  │
//! │  [advocate ∥ skeptic] → improve → re-evaluate         │
//! └──────────┬──────────────────────────┬────────────────┘
//!            │                          │
//!            ▼                          ▼
//! ┌────────────────────┐   ┌────────────────────────────┐
//! │ TextCompletion     │   │      ReasoningEngine        │
//! │ Client (Anthropic) │   │ context memory · inference  │
//! └────────────────────┘   │ multi-dim eval · tracking   │
//!                          └────────────────────────────┘
//! ```

pub mod client;
pub mod coordinator;
pub mod error;
pub mod prompts;
pub mod reasoning;
pub mod similarity;
pub mod types;

// Core entry points
pub use client::{
    complete_with_retry, AnthropicClient, Completion, CompletionRequest, RetryPolicy,
    TextCompletionClient,
};
pub use coordinator::{Coordinator, ProgressCallback, RunOptions, RunRequest};
pub use error::{CompletionError, ConfigurationError, CoordinatorError, ReasoningError};
pub use types::*;

// Reasoning layer
pub use reasoning::context_memory::{ContextMatch, ContextMemory, ContextRecord};
pub use reasoning::conversation::{ConversationTracker, FlowAnalysis, InteractionRecord};
pub use reasoning::evaluator::{
    DimensionScore, DimensionWeights, MultiDimEvaluation, MultiDimensionalEvaluator,
};
pub use reasoning::inference::{
    ConsistencyReport, InferenceChain, InferenceRule, InferenceStep, LogicalInference,
};
pub use reasoning::{ContextInsights, ReasoningConfig, ReasoningEngine};

/// Initialize the standard tracing subscriber, honoring `RUST_LOG`.
/// Hosts call this once at startup.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
