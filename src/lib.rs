//! Groups company logos that are the same image or visually near-identical.
//!
//! Exact copies are caught by content digest, persisted across runs. The rest
//! go through a perceptual fingerprint, a cheap candidate filter, a structural
//! similarity check and finally connected components over confirmed matches.

pub mod config;
pub mod engine;
pub mod services;

pub use config::{Config, ConfigError, MatchConfig};
pub use engine::bucket::CandidateStrategy;
pub use engine::filename::{AssetFilename, Domain, FilenameError};
pub use engine::pipeline::{BatchItem, BatchOutcome, ClusterEngine, DomainCluster, SkipKind, SkippedAsset};
pub use services::digest::{ContentDigest, DigestIndex, DigestSession, DigestStore, JsonDigestStore};
