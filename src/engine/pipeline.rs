//! Batch clustering run.
//!
//! Stages run behind barriers: exact dedup (sequential, the only writer of the
//! digest index), normalization and fingerprinting (parallel), candidate
//! generation, pairwise refinement (parallel), then component extraction.
//! A failing asset is skipped and reported; it never aborts the batch.

use crate::config::MatchConfig;
use crate::engine::bucket::candidate_pairs;
use crate::engine::filename::{AssetFilename, Domain};
use crate::engine::fingerprint::{Fingerprint, FingerprintError, FingerprintGenerator};
use crate::engine::graph::{Cluster, SimilarityGraph};
use crate::engine::normalize::Normalizer;
use crate::engine::refine::confirm_matches;
use crate::engine::similarity::{Ssim, StructuralScorer};
use crate::services::digest::{ContentDigest, DigestIndex};
use image::GrayImage;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Fingerprint setup failed: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone)]
pub enum AssetSource {
    File(PathBuf),
    Memory {
        filename: String,
        bytes: Vec<u8>,
        normalized: Option<GrayImage>,
    },
}

/// One input to a run. The domain comes from the filename unless given.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub source: AssetSource,
    pub domain: Option<Domain>,
    /// Whether the source is a file of the asset store. Only stored assets
    /// are recorded in the digest index.
    pub in_store: bool,
}

impl BatchItem {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: AssetSource::File(path.into()),
            domain: None,
            in_store: false,
        }
    }

    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            source: AssetSource::Memory {
                filename: filename.into(),
                bytes,
                normalized: None,
            },
            domain: None,
            in_store: false,
        }
    }

    /// Attach a buffer an upstream collaborator already normalized.
    pub fn with_normalized(mut self, gray: GrayImage) -> Self {
        if let AssetSource::Memory { normalized, .. } = &mut self.source {
            *normalized = Some(gray);
        }
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Mark the source as a file the asset store holds under its own name.
    pub fn in_store(mut self) -> Self {
        self.in_store = true;
        self
    }

    pub fn filename(&self) -> String {
        match &self.source {
            AssetSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            AssetSource::Memory { filename, .. } => filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    UnreadableAsset,
    MalformedFilename,
    MissingFile,
    MalformedEntry,
}

impl SkipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipKind::UnreadableAsset => "unreadable_asset",
            SkipKind::MalformedFilename => "malformed_filename",
            SkipKind::MissingFile => "missing_file",
            SkipKind::MalformedEntry => "malformed_entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAsset {
    pub filename: String,
    pub kind: SkipKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainCluster {
    pub group_id: usize,
    /// Member domains in input order
    pub domains: Vec<Domain>,
    /// Canonical filenames of the member assets
    pub filenames: Vec<String>,
}

/// Domains that submitted byte-identical logos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub digest: String,
    pub filename: String,
    pub domains: Vec<Domain>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub inputs: usize,
    pub exact_duplicates: usize,
    pub fingerprinted: usize,
    pub candidate_pairs: usize,
    pub confirmed_matches: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub clusters: Vec<DomainCluster>,
    pub duplicates: Vec<DuplicateGroup>,
    pub skipped: Vec<SkippedAsset>,
    pub stats: BatchStats,
}

/// An asset that survived exact dedup, before decoding.
struct PendingAsset {
    source_name: String,
    filename: String,
    digest: ContentDigest,
    bytes: Vec<u8>,
    normalized: Option<GrayImage>,
    /// `(input position, domain)` for every item sharing these bytes
    domains: Vec<(usize, Domain)>,
}

struct FingerprintedAsset {
    filename: String,
    domains: Vec<(usize, Domain)>,
    pixels: GrayImage,
    fingerprint: Fingerprint,
}

pub struct ClusterEngine {
    config: MatchConfig,
    normalizer: Normalizer,
    generator: FingerprintGenerator,
    scorer: Box<dyn StructuralScorer>,
    pool: Option<rayon::ThreadPool>,
    progress: ProgressBar,
}

impl ClusterEngine {
    pub fn new(config: MatchConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            normalizer: Normalizer::new(config.canvas_size, config.background),
            generator: FingerprintGenerator::new(config.fingerprint_side)?,
            scorer: Box::new(Ssim::default()),
            pool: None,
            progress: ProgressBar::hidden(),
            config,
        })
    }

    pub fn with_scorer(mut self, scorer: impl StructuralScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("logomatch-worker-{}", i))
            .build()?;
        self.pool = Some(pool);
        Ok(self)
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Cluster `items`. Digests already in `index` resolve to their canonical
    /// filename; new digests are recorded only for stored assets.
    pub fn run(&self, items: Vec<BatchItem>, index: &mut DigestIndex) -> BatchOutcome {
        match &self.pool {
            Some(pool) => pool.install(|| self.run_stages(items, index)),
            None => self.run_stages(items, index),
        }
    }

    fn run_stages(&self, items: Vec<BatchItem>, index: &mut DigestIndex) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        outcome.stats.inputs = items.len();

        let pending = benchmark("exact dedup", || {
            self.dedup_stage(items, index, &mut outcome)
        });
        outcome.duplicates = duplicate_groups(&pending);

        let assets = benchmark("fingerprinting", || {
            self.fingerprint_stage(pending, &mut outcome.skipped)
        });
        outcome.stats.fingerprinted = assets.len();

        let fingerprints: Vec<Fingerprint> =
            assets.iter().map(|a| a.fingerprint.clone()).collect();
        let clusters = benchmark("refinement", || {
            self.link(&fingerprints, &mut outcome.stats, |left, right| {
                match self
                    .scorer
                    .similarity(&assets[left].pixels, &assets[right].pixels)
                {
                    Ok(score) => Some(score),
                    Err(e) => {
                        log::warn!(
                            "Cannot compare {} and {}: {}",
                            assets[left].filename,
                            assets[right].filename,
                            e
                        );
                        None
                    }
                }
            })
        });

        outcome.clusters = clusters
            .into_iter()
            .map(|cluster| domain_cluster(&cluster, &assets))
            .collect();
        outcome.stats.skipped = outcome.skipped.len();

        log::info!(
            "Clustered {} inputs into {} groups ({} exact duplicates, {} skipped)",
            outcome.stats.inputs,
            outcome.clusters.len(),
            outcome.stats.exact_duplicates,
            outcome.stats.skipped
        );
        outcome
    }

    fn dedup_stage(
        &self,
        items: Vec<BatchItem>,
        index: &mut DigestIndex,
        outcome: &mut BatchOutcome,
    ) -> Vec<PendingAsset> {
        let mut pending: Vec<PendingAsset> = Vec::new();
        let mut by_digest: HashMap<ContentDigest, usize> = HashMap::new();

        for (position, item) in items.into_iter().enumerate() {
            let source_name = item.filename();
            let in_store = item.in_store;
            let mut skip = |kind, reason: String| {
                log::warn!("Skipping {}: {}", source_name, reason);
                outcome.skipped.push(SkippedAsset {
                    filename: source_name.clone(),
                    kind,
                    reason,
                });
            };

            let domain = match item.domain {
                Some(domain) => domain,
                None => match source_name.parse::<AssetFilename>() {
                    Ok(parsed) => parsed.domain,
                    Err(e) => {
                        skip(SkipKind::MalformedFilename, e.to_string());
                        continue;
                    }
                },
            };

            let (bytes, normalized) = match item.source {
                AssetSource::File(path) => match read_asset(&path) {
                    Ok(bytes) => (bytes, None),
                    Err((kind, reason)) => {
                        skip(kind, reason);
                        continue;
                    }
                },
                AssetSource::Memory {
                    bytes, normalized, ..
                } => (bytes, normalized),
            };

            let digest = ContentDigest::of_bytes(&bytes);
            if let Some(&existing) = by_digest.get(&digest) {
                log::debug!(
                    "{} is byte-identical to {}",
                    source_name,
                    pending[existing].filename
                );
                pending[existing].domains.push((position, domain));
                outcome.stats.exact_duplicates += 1;
                continue;
            }

            let filename = match index.lookup(&digest) {
                Some(canonical) => canonical.to_string(),
                None if in_store && source_name.parse::<AssetFilename>().is_ok() => {
                    index.record(digest, source_name.clone()).to_string()
                }
                None => source_name.clone(),
            };
            by_digest.insert(digest, pending.len());
            pending.push(PendingAsset {
                source_name,
                filename,
                digest,
                bytes,
                normalized,
                domains: vec![(position, domain)],
            });
        }

        pending
    }

    fn fingerprint_stage(
        &self,
        pending: Vec<PendingAsset>,
        skipped: &mut Vec<SkippedAsset>,
    ) -> Vec<FingerprintedAsset> {
        self.progress.set_length(pending.len() as u64);
        self.progress.set_message("Fingerprinting");

        let results: Vec<Result<FingerprintedAsset, SkippedAsset>> = pending
            .into_par_iter()
            .map(|asset| {
                let normalized = match asset.normalized {
                    Some(gray) => self.normalizer.accept_normalized(gray),
                    None => self.normalizer.normalize_bytes(&asset.bytes),
                };
                self.progress.inc(1);

                match normalized {
                    Ok(pixels) => Ok(FingerprintedAsset {
                        fingerprint: self.generator.fingerprint(&pixels),
                        filename: asset.filename,
                        domains: asset.domains,
                        pixels,
                    }),
                    Err(e) => Err(SkippedAsset {
                        filename: asset.source_name,
                        kind: SkipKind::UnreadableAsset,
                        reason: e.to_string(),
                    }),
                }
            })
            .collect();
        self.progress.finish_and_clear();

        let mut assets = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(asset) => assets.push(asset),
                Err(skip) => {
                    log::warn!("Skipping {}: {}", skip.filename, skip.reason);
                    skipped.push(skip);
                }
            }
        }
        assets
    }

    /// Candidate generation, refinement and component extraction over
    /// already computed fingerprints.
    fn link<F>(&self, fingerprints: &[Fingerprint], stats: &mut BatchStats, score: F) -> Vec<Cluster>
    where
        F: Fn(usize, usize) -> Option<f64> + Sync,
    {
        let candidates = candidate_pairs(
            fingerprints,
            self.config.strategy,
            self.config.bucket_prefix_len,
            self.config.hamming_threshold,
        );
        stats.candidate_pairs = candidates.len();

        let confirmed = confirm_matches(&candidates, &self.config.policy(), score);
        stats.confirmed_matches = confirmed.len();
        log::debug!(
            "{} candidate pairs, {} confirmed",
            candidates.len(),
            confirmed.len()
        );

        SimilarityGraph::from_edges(
            fingerprints.len(),
            confirmed.iter().map(|m| (m.left, m.right)),
        )
        .clusters()
    }
}

fn read_asset(path: &Path) -> Result<Vec<u8>, (SkipKind, String)> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            (SkipKind::MissingFile, format!("{} not found", path.display()))
        } else {
            (SkipKind::UnreadableAsset, e.to_string())
        }
    })
}

fn domain_cluster(cluster: &Cluster, assets: &[FingerprintedAsset]) -> DomainCluster {
    let mut members: Vec<&(usize, Domain)> = cluster
        .members
        .iter()
        .flat_map(|&idx| assets[idx].domains.iter())
        .collect();
    members.sort_by_key(|(position, _)| *position);

    let mut seen = HashSet::new();
    let domains = members
        .into_iter()
        .filter(|(_, domain)| seen.insert(domain.clone()))
        .map(|(_, domain)| domain.clone())
        .collect();

    DomainCluster {
        group_id: cluster.group_id,
        domains,
        filenames: cluster
            .members
            .iter()
            .map(|&idx| assets[idx].filename.clone())
            .collect(),
    }
}

fn duplicate_groups(pending: &[PendingAsset]) -> Vec<DuplicateGroup> {
    pending
        .iter()
        .filter(|asset| asset.domains.len() > 1)
        .map(|asset| DuplicateGroup {
            digest: asset.digest.to_hex(),
            filename: asset.filename.clone(),
            domains: asset.domains.iter().map(|(_, d)| d.clone()).collect(),
        })
        .collect()
}

/// Run `f()`, log how long it took (with `label`), and return its result.
pub fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
