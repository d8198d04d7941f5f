//! Append-only interaction log with workflow-flow analysis.
//!
//! Unlike [`ContextMemory`](crate::reasoning::context_memory::ContextMemory),
//! this store never evicts: it lives for one session and is cleared by the
//! caller, not by a capacity policy. Flow analysis reports which of the
//! expected pipeline roles have been observed and what interaction
//! patterns the sequence shows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::similarity;

/// Roles expected in one full workflow pass, order-insensitive.
pub const EXPECTED_ROLES: [&str; 5] = ["generate", "critique", "advocate", "skeptic", "improve"];

/// One logged interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: u64,
    pub agent: String,
    pub input: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Summary of the conversation so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAnalysis {
    /// Agents in interaction order.
    pub agent_sequence: Vec<String>,
    pub interaction_count: usize,
    /// Fraction of [`EXPECTED_ROLES`] observed at least once.
    pub workflow_completeness: f64,
    /// Human-readable structural observations.
    pub patterns: Vec<String>,
}

/// Append-only, session-lifetime interaction log.
#[derive(Debug, Default)]
pub struct ConversationTracker {
    next_id: u64,
    records: Vec<InteractionRecord>,
}

impl ConversationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interaction. Never evicts.
    pub fn add_interaction(
        &mut self,
        agent: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(InteractionRecord {
            id,
            agent: agent.into(),
            input: input.into(),
            output: output.into(),
            timestamp: Utc::now(),
            metadata,
        });
        id
    }

    /// Workflow completeness and structural patterns of the log so far.
    pub fn analyze_flow(&self) -> FlowAnalysis {
        let agent_sequence: Vec<String> = self.records.iter().map(|r| r.agent.clone()).collect();
        let observed: HashSet<&str> = agent_sequence.iter().map(String::as_str).collect();

        let seen_roles = EXPECTED_ROLES
            .iter()
            .filter(|role| observed.contains(**role))
            .count();
        let workflow_completeness = seen_roles as f64 / EXPECTED_ROLES.len() as f64;

        let mut patterns = Vec::new();
        if seen_roles == EXPECTED_ROLES.len() {
            patterns.push("full workflow pass observed".to_string());
        }
        // A critique following an improve means the loop re-evaluated.
        let improved_then_critiqued = agent_sequence
            .windows(2)
            .any(|pair| pair[0] == "improve" && pair[1] == "critique");
        if improved_then_critiqued {
            patterns.push("re-evaluation loop".to_string());
        }
        if let Some((agent, count)) = self.dominant_agent(&agent_sequence) {
            if count * 2 > agent_sequence.len() && agent_sequence.len() > 1 {
                patterns.push(format!("dominant agent: {agent}"));
            }
        }

        FlowAnalysis {
            interaction_count: agent_sequence.len(),
            agent_sequence,
            workflow_completeness,
            patterns,
        }
    }

    fn dominant_agent(&self, sequence: &[String]) -> Option<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for agent in sequence {
            *counts.entry(agent).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(agent, count)| (agent.to_string(), count))
    }

    /// Interactions relevant to `query`, by the shared Jaccard measure,
    /// most similar first; ties break most-recent-first.
    pub fn extract_relevant(&self, query: &str, threshold: f64) -> Vec<InteractionRecord> {
        let query_tokens = similarity::token_set(query);
        let mut scored: Vec<(f64, &InteractionRecord)> = self
            .records
            .iter()
            .map(|record| {
                let combined = format!("{} {}", record.input, record.output);
                let sim = similarity::jaccard_sets(&query_tokens, &similarity::token_set(&combined));
                (sim, record)
            })
            .filter(|(sim, _)| *sim >= threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.id.cmp(&a.1.id))
        });
        scored.into_iter().map(|(_, r)| r.clone()).collect()
    }

    /// Drop every record. Lifecycle is caller-controlled.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn completeness_counts_each_expected_role_once() {
        let mut tracker = ConversationTracker::new();
        tracker.add_interaction("generate", "topic", "idea", meta());
        tracker.add_interaction("critique", "idea", "score 6", meta());
        tracker.add_interaction("critique", "idea", "score 7", meta());

        let flow = tracker.analyze_flow();
        assert_eq!(flow.interaction_count, 3);
        // 2 of 5 roles observed; the repeat does not double-count.
        assert!((flow.workflow_completeness - 0.4).abs() < 1e-9);
    }

    #[test]
    fn full_pass_reaches_completeness_one_regardless_of_order() {
        let mut tracker = ConversationTracker::new();
        for agent in ["skeptic", "improve", "generate", "advocate", "critique"] {
            tracker.add_interaction(agent, "x", "y", meta());
        }
        let flow = tracker.analyze_flow();
        assert!((flow.workflow_completeness - 1.0).abs() < 1e-9);
        assert!(flow
            .patterns
            .iter()
            .any(|p| p == "full workflow pass observed"));
    }

    #[test]
    fn re_evaluation_loop_is_detected() {
        let mut tracker = ConversationTracker::new();
        tracker.add_interaction("improve", "idea", "idea v2", meta());
        tracker.add_interaction("critique", "idea v2", "score 8", meta());

        let flow = tracker.analyze_flow();
        assert!(flow.patterns.iter().any(|p| p == "re-evaluation loop"));
    }

    #[test]
    fn extract_relevant_ranks_by_similarity() {
        let mut tracker = ConversationTracker::new();
        tracker.add_interaction("critique", "solar charger design", "solid", meta());
        tracker.add_interaction("critique", "wind turbine design", "shaky", meta());

        let hits = tracker.extract_relevant("solar charger", 0.1);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].input, "solar charger design");
    }

    #[test]
    fn clear_is_the_only_way_records_leave() {
        let mut tracker = ConversationTracker::new();
        for i in 0..100 {
            tracker.add_interaction("generate", format!("topic {i}"), "idea", meta());
        }
        assert_eq!(tracker.len(), 100);
        tracker.clear();
        assert!(tracker.is_empty());
        // Ids keep climbing after a clear.
        let id = tracker.add_interaction("generate", "fresh", "idea", meta());
        assert_eq!(id, 100);
    }
}
