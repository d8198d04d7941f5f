//! Token-set similarity and content hashing.
//!
//! One normalization pipeline shared by the novelty filter, context memory,
//! and conversation tracking: lowercase, strip punctuation, split on
//! whitespace, Jaccard over the resulting sets. Exact-duplicate detection
//! uses a SHA-256 hash of the normalized text so reordered whitespace or
//! casing differences still collide.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Default cutoff for "related enough to surface" in similarity lookups.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Normalized token set of a text.
pub fn token_set(text: &str) -> HashSet<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard index of two pre-built token sets. Two empty sets are identical.
pub fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Jaccard index over normalized token sets of two texts.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_sets(&token_set(a), &token_set(b))
}

/// SHA-256 of the normalized text, hex-encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hex::encode(hasher.finalize())
}
