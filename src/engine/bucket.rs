//! Candidate generation.
//!
//! Bucketed mode only compares fingerprints that share a hex prefix. This
//! misses similar pairs whose prefixes differ, but every pair it does propose
//! shares a bucket. Exhaustive mode compares all pairs and is complete within
//! the Hamming threshold.

use crate::engine::fingerprint::Fingerprint;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStrategy {
    /// Compare only within fingerprint-prefix buckets (fast, approximate)
    #[default]
    Bucketed,
    /// Compare every pair under the Hamming pre-filter (slow, complete)
    Exhaustive,
}

/// A pair of image indices worth refining, `left < right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidatePair {
    pub left: usize,
    pub right: usize,
    pub distance: u32,
}

pub fn bucket_key(fingerprint: &Fingerprint, prefix_len: usize) -> String {
    let hex = fingerprint.to_hex();
    hex[..prefix_len.min(hex.len())].to_string()
}

/// Images grouped by fingerprint prefix. Rebuilt every run.
#[derive(Debug, Default)]
pub struct BucketIndex {
    buckets: BTreeMap<String, Vec<usize>>,
    keys: Vec<String>,
}

impl BucketIndex {
    pub fn build(fingerprints: &[Fingerprint], prefix_len: usize) -> Self {
        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut keys = Vec::with_capacity(fingerprints.len());

        for (idx, fingerprint) in fingerprints.iter().enumerate() {
            let key = bucket_key(fingerprint, prefix_len);
            buckets.entry(key.clone()).or_default().push(idx);
            keys.push(key);
        }

        Self { buckets, keys }
    }

    pub fn key_of(&self, idx: usize) -> Option<&str> {
        self.keys.get(idx).map(String::as_str)
    }

    /// Images bucketed before `idx` that share its key.
    pub fn candidates_for(&self, idx: usize) -> &[usize] {
        let Some(members) = self.key_of(idx).and_then(|key| self.buckets.get(key)) else {
            return &[];
        };
        let end = members.partition_point(|&other| other < idx);
        &members[..end]
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.buckets
            .iter()
            .map(|(key, members)| (key.as_str(), members.as_slice()))
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Propose pairs whose fingerprints are within `max_distance` bits, sorted by
/// `(left, right)`.
pub fn candidate_pairs(
    fingerprints: &[Fingerprint],
    strategy: CandidateStrategy,
    prefix_len: usize,
    max_distance: u32,
) -> Vec<CandidatePair> {
    let n = fingerprints.len();

    let mut pairs: Vec<CandidatePair> = match strategy {
        CandidateStrategy::Exhaustive => (0..n)
            .into_par_iter()
            .flat_map_iter(|right| (0..right).map(move |left| (left, right)))
            .filter_map(|(left, right)| within(fingerprints, left, right, max_distance))
            .collect(),
        CandidateStrategy::Bucketed => {
            let index = BucketIndex::build(fingerprints, prefix_len);
            log::debug!(
                "Bucketed {} fingerprints into {} buckets",
                n,
                index.bucket_count()
            );
            (0..n)
                .into_par_iter()
                .flat_map_iter(|right| {
                    index
                        .candidates_for(right)
                        .iter()
                        .map(move |&left| (left, right))
                })
                .filter_map(|(left, right)| within(fingerprints, left, right, max_distance))
                .collect()
        }
    };

    pairs.sort_unstable();
    pairs
}

fn within(
    fingerprints: &[Fingerprint],
    left: usize,
    right: usize,
    max_distance: u32,
) -> Option<CandidatePair> {
    let distance = fingerprints[left].distance(&fingerprints[right]);
    (distance <= max_distance).then_some(CandidatePair {
        left,
        right,
        distance,
    })
}
