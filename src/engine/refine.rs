use crate::engine::bucket::CandidatePair;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Both gates must pass for a pair to count as the same logo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub max_distance: u32,
    pub min_similarity: f64,
}

impl MatchPolicy {
    pub fn accepts(&self, distance: u32, similarity: f64) -> bool {
        distance <= self.max_distance && similarity >= self.min_similarity
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmedMatch {
    pub left: usize,
    pub right: usize,
    pub distance: u32,
    pub similarity: f64,
}

/// Score every candidate in parallel and keep the ones `policy` accepts.
///
/// `score` returns `None` when a pair cannot be scored; such pairs are
/// rejected. Output keeps the candidate order.
pub fn confirm_matches<F>(
    candidates: &[CandidatePair],
    policy: &MatchPolicy,
    score: F,
) -> Vec<ConfirmedMatch>
where
    F: Fn(usize, usize) -> Option<f64> + Sync,
{
    candidates
        .par_iter()
        .filter(|pair| pair.distance <= policy.max_distance)
        .filter_map(|pair| {
            let similarity = score(pair.left, pair.right)?;
            policy
                .accepts(pair.distance, similarity)
                .then_some(ConfirmedMatch {
                    left: pair.left,
                    right: pair.right,
                    distance: pair.distance,
                    similarity,
                })
        })
        .collect()
}
