//! Bounded store of past interactions with similarity search.
//!
//! A FIFO ring of [`ContextRecord`]s: ids are monotonic and never reused,
//! the oldest record is evicted first when capacity is exceeded, and
//! lookups are Jaccard similarity over normalized token sets of the
//! combined input and output text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::similarity;

/// Default number of records kept before FIFO eviction kicks in.
pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;

/// One stored interaction. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub id: u64,
    pub agent: String,
    pub input_text: String,
    pub output_text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A similarity hit from [`ContextMemory::find_similar`].
#[derive(Debug, Clone)]
pub struct ContextMatch {
    pub record: ContextRecord,
    pub similarity: f64,
}

/// Bounded FIFO store of past interactions.
#[derive(Debug)]
pub struct ContextMemory {
    capacity: usize,
    next_id: u64,
    records: VecDeque<ContextRecord>,
}

impl Default for ContextMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl ContextMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 0,
            records: VecDeque::new(),
        }
    }

    /// Append a record, evicting the oldest first if over capacity.
    /// Returns the assigned id; ids are monotonic and never reused.
    pub fn store(
        &mut self,
        agent: impl Into<String>,
        input_text: impl Into<String>,
        output_text: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push_back(ContextRecord {
            id,
            agent: agent.into(),
            input_text: input_text.into(),
            output_text: output_text.into(),
            timestamp: Utc::now(),
            metadata,
        });
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        id
    }

    /// Records whose combined input+output text is at least `threshold`
    /// similar to `query`, sorted by descending similarity; ties break
    /// most-recent-first.
    pub fn find_similar(&self, query: &str, threshold: f64) -> Vec<ContextMatch> {
        let query_tokens = similarity::token_set(query);
        let mut matches: Vec<ContextMatch> = self
            .records
            .iter()
            .map(|record| {
                let combined = format!("{} {}", record.input_text, record.output_text);
                let sim = similarity::jaccard_sets(&query_tokens, &similarity::token_set(&combined));
                ContextMatch {
                    record: record.clone(),
                    similarity: sim,
                }
            })
            .filter(|m| m.similarity >= threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.record.id.cmp(&a.record.id))
        });
        matches
    }

    /// All records from one agent, in insertion order.
    pub fn search_by_agent(&self, agent: &str) -> Vec<ContextRecord> {
        self.records
            .iter()
            .filter(|r| r.agent == agent)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
