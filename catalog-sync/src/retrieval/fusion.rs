//! Reciprocal Rank Fusion
//!
//! Each item at 0-based rank `r` of a ranking contributes `1 / (k + r + 1)`;
//! an item present in several rankings sums its contributions. Items are
//! returned by descending fused score. Equal scores keep the order in which
//! the items were first seen walking the rankings in the order given.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

/// Default RRF smoothing constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// RRF configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fusion {
    pub rrf_k: f64,
}

impl Default for Fusion {
    fn default() -> Self {
        Self { rrf_k: DEFAULT_RRF_K }
    }
}

/// An item with its fused score
#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem<T> {
    pub item: T,
    pub score: f64,
}

impl Fusion {
    pub fn new(rrf_k: f64) -> Self {
        Self { rrf_k }
    }

    /// Fuse `rankings` and return every distinct item, best first
    pub fn fuse<T>(&self, rankings: &[&[T]]) -> Vec<FusedItem<T>>
    where
        T: Eq + Hash + Clone,
    {
        let mut first_seen: Vec<T> = Vec::new();
        let mut scores: HashMap<T, f64> = HashMap::new();

        for ranking in rankings {
            for (rank, item) in ranking.iter().enumerate() {
                let contribution = 1.0 / (self.rrf_k + rank as f64 + 1.0);
                match scores.get_mut(item) {
                    Some(score) => *score += contribution,
                    None => {
                        scores.insert(item.clone(), contribution);
                        first_seen.push(item.clone());
                    }
                }
            }
        }

        let mut fused: Vec<FusedItem<T>> = first_seen
            .into_iter()
            .map(|item| {
                let score = scores.get(&item).copied().unwrap_or_default();
                FusedItem { item, score }
            })
            .collect();

        // Stable: equal scores stay in first-seen order
        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        fused
    }

    /// Fuse and keep the best `limit` items
    pub fn top<T>(&self, rankings: &[&[T]], limit: usize) -> Vec<T>
    where
        T: Eq + Hash + Clone,
    {
        self.fuse(rankings)
            .into_iter()
            .take(limit)
            .map(|fused| fused.item)
            .collect()
    }
}
