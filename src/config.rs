use crate::engine::bucket::CandidateStrategy;
use crate::engine::fingerprint::SUPPORTED_SIDES;
use crate::engine::refine::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Thresholds and geometry shared by both candidate strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum fingerprint Hamming distance for a match
    pub hamming_threshold: u32,
    /// Minimum structural similarity for a match
    pub ssim_threshold: f64,
    pub strategy: CandidateStrategy,
    /// Bucket key length in hex characters
    pub bucket_prefix_len: usize,
    /// Fingerprint is `side * side` bits
    pub fingerprint_side: u32,
    /// Normalized images are `canvas_size` pixels square
    pub canvas_size: u32,
    /// Gray level used for padding and transparency
    pub background: u8,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            hamming_threshold: 12,
            ssim_threshold: 0.75,
            strategy: CandidateStrategy::Bucketed,
            bucket_prefix_len: 8,
            fingerprint_side: 8,
            canvas_size: 128,
            background: 255,
        }
    }
}

impl MatchConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            max_distance: self.hamming_threshold,
            min_similarity: self.ssim_threshold,
        }
    }

    pub fn fingerprint_bits(&self) -> u32 {
        self.fingerprint_side * self.fingerprint_side
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SIDES.contains(&self.fingerprint_side) {
            return Err(ConfigError::Invalid {
                field: "fingerprint_side",
                message: format!("{} is not one of {:?}", self.fingerprint_side, SUPPORTED_SIDES),
            });
        }
        if self.hamming_threshold > self.fingerprint_bits() {
            return Err(ConfigError::Invalid {
                field: "hamming_threshold",
                message: format!(
                    "{} exceeds the {}-bit fingerprint",
                    self.hamming_threshold,
                    self.fingerprint_bits()
                ),
            });
        }
        if !(-1.0..=1.0).contains(&self.ssim_threshold) {
            return Err(ConfigError::Invalid {
                field: "ssim_threshold",
                message: format!("{} is outside [-1, 1]", self.ssim_threshold),
            });
        }
        let hex_width = (self.fingerprint_bits() / 4) as usize;
        if self.bucket_prefix_len == 0 || self.bucket_prefix_len > hex_width {
            return Err(ConfigError::Invalid {
                field: "bucket_prefix_len",
                message: format!("{} is outside 1..={}", self.bucket_prefix_len, hex_width),
            });
        }
        if self.canvas_size < 8 {
            return Err(ConfigError::Invalid {
                field: "canvas_size",
                message: format!("{} is below the minimum of 8", self.canvas_size),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding stored logo assets
    pub store_dir: PathBuf,
    /// Persisted digest -> filename mapping
    pub digest_file: PathBuf,
    /// Worker threads for fingerprinting and refinement (default: all cores)
    pub workers: Option<usize>,
    pub matching: MatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data/logos"),
            digest_file: PathBuf::from("data/digests.json"),
            workers: None,
            matching: MatchConfig::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("logomatch").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist; otherwise the default location is used
    /// when present, falling back to built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Using config {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "workers",
                message: "must be at least 1".to_string(),
            });
        }
        self.matching.validate()
    }
}
