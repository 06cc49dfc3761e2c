//! On-disk logo store. Holds at most one file per unique byte sequence.

use crate::engine::filename::{AssetFilename, Disambiguator, Domain, FilenameError};
use crate::engine::pipeline::{DuplicateGroup, SkipKind, SkippedAsset};
use crate::services::digest::{ContentDigest, DigestIndex};
use crate::services::manifest::Manifest;
use chrono::Utc;
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Unsupported file extension: {extension}")]
    UnsupportedExtension { extension: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New bytes, written under `filename`
    Stored {
        filename: String,
        digest: ContentDigest,
    },
    /// Byte-identical to an asset already stored as `filename`
    Duplicate {
        filename: String,
        digest: ContentDigest,
    },
}

impl IngestOutcome {
    pub fn filename(&self) -> &str {
        match self {
            IngestOutcome::Stored { filename, .. } | IngestOutcome::Duplicate { filename, .. } => {
                filename
            }
        }
    }

    pub fn digest(&self) -> ContentDigest {
        match self {
            IngestOutcome::Stored { digest, .. } | IngestOutcome::Duplicate { digest, .. } => {
                *digest
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate { .. })
    }
}

/// Result of ingesting a whole manifest.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub outcomes: Vec<(Domain, IngestOutcome)>,
    /// Digests submitted by more than one domain in this batch
    pub duplicates: Vec<DuplicateGroup>,
    pub skipped: Vec<SkippedAsset>,
}

impl IngestReport {
    pub fn stored(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| !o.is_duplicate()).count()
    }
}

pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(StorageError::InvalidPath {
                path: format!("{} is not a directory", root.display()),
            });
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Store `bytes` for `domain` unless an identical asset is already known
    /// to `index`. Single writer: callers serialize access to `index`.
    pub fn ingest(
        &self,
        domain: &Domain,
        bytes: &[u8],
        extension: &str,
        index: &mut DigestIndex,
    ) -> Result<IngestOutcome, StorageError> {
        let digest = ContentDigest::of_bytes(bytes);

        if let Some(existing) = index.lookup(&digest) {
            let existing = existing.to_string();
            if existing.parse::<AssetFilename>().is_ok() {
                let path = self.path_of(&existing);
                if !path.exists() {
                    // The index outlived the file; put the bytes back under the canonical name.
                    log::warn!("Restoring missing canonical asset {}", path.display());
                    self.write_new(&path, bytes, &digest)?;
                }
                return Ok(IngestOutcome::Duplicate {
                    filename: existing,
                    digest,
                });
            }
            log::warn!(
                "Ignoring digest entry {} with non-store filename {}",
                digest,
                existing
            );
        }

        let extension = validate_extension(extension)?;
        let filename = self.store_unique(domain, &extension, &digest, bytes)?;

        index.replace(digest, filename.clone());
        Ok(IngestOutcome::Stored { filename, digest })
    }

    /// Write `bytes` under the first free name, trying a timestamp and then
    /// the digest as disambiguator.
    fn store_unique(
        &self,
        domain: &Domain,
        extension: &str,
        digest: &ContentDigest,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let timestamp = Utc::now().timestamp().max(0) as u64;
        let candidates = [
            Disambiguator::Timestamp(timestamp),
            Disambiguator::Digest(digest.to_hex()),
        ];

        let mut last_err = None;
        for disambiguator in candidates {
            let filename = AssetFilename::new(domain.clone(), disambiguator, extension).to_string();
            match self.write_new(&self.path_of(&filename), bytes, digest) {
                Ok(()) => return Ok(filename),
                Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    last_err = Some(e)
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .map(StorageError::Io)
            .unwrap_or_else(|| StorageError::InvalidPath {
                path: self.root.display().to_string(),
            }))
    }

    /// Fully write and sync a hidden temporary, then link it into place.
    /// `target` only ever appears complete, and an existing `target` is
    /// reported as `AlreadyExists` rather than overwritten.
    fn write_new(
        &self,
        target: &Path,
        bytes: &[u8],
        digest: &ContentDigest,
    ) -> Result<(), StorageError> {
        let tmp = self.root.join(format!(".{}.tmp", digest));

        let written = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::hard_link(&tmp, target));

        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Could not remove temporary {}: {}", tmp.display(), e);
            }
        }
        written.map_err(StorageError::from)
    }

    /// Ingest every entry of `manifest`. A bad entry is skipped and reported;
    /// the rest of the batch still goes through.
    pub fn ingest_manifest(
        &self,
        source: &Path,
        manifest: &Manifest,
        index: &mut DigestIndex,
        progress: &ProgressBar,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        report.skipped.extend(manifest.rejected.iter().map(|rejected| SkippedAsset {
            filename: format!("{}:{}", source.display(), rejected.line),
            kind: SkipKind::MalformedEntry,
            reason: rejected.reason.clone(),
        }));

        let mut by_digest: BTreeMap<ContentDigest, DuplicateGroup> = BTreeMap::new();
        for entry in &manifest.entries {
            progress.set_message(entry.domain.to_string());
            progress.inc(1);

            let mut skip = |kind, reason: String| {
                log::warn!("Skipping {}: {}", entry.path.display(), reason);
                report.skipped.push(SkippedAsset {
                    filename: entry.path.display().to_string(),
                    kind,
                    reason,
                });
            };

            let bytes = match fs::read(&entry.path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    skip(SkipKind::MissingFile, format!("{} not found", entry.path.display()));
                    continue;
                }
                Err(e) => {
                    skip(SkipKind::UnreadableAsset, e.to_string());
                    continue;
                }
            };
            let extension = entry
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("png");

            match self.ingest(&entry.domain, &bytes, extension, index) {
                Ok(outcome) => {
                    by_digest
                        .entry(outcome.digest())
                        .or_insert_with(|| DuplicateGroup {
                            digest: outcome.digest().to_hex(),
                            filename: outcome.filename().to_string(),
                            domains: Vec::new(),
                        })
                        .domains
                        .push(entry.domain.clone());
                    report.outcomes.push((entry.domain.clone(), outcome));
                }
                Err(e) => skip(SkipKind::UnreadableAsset, e.to_string()),
            }
        }

        report.duplicates = by_digest
            .into_values()
            .filter(|group| group.domains.len() > 1)
            .collect();
        report
    }

    /// Files directly inside the store, sorted by name. Hidden files and
    /// in-flight temporaries are skipped.
    pub fn list(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other(format!("cannot walk {}", self.root.display()))
                })
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        Ok(files)
    }

    /// `(domain, filename)` for every well-formed file, plus the files whose
    /// names could not be parsed.
    pub fn domain_mapping(
        &self,
    ) -> Result<(Vec<(Domain, String)>, Vec<(String, FilenameError)>), StorageError> {
        let mut mapping = Vec::new();
        let mut malformed = Vec::new();
        for path in self.list()? {
            let name = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            match AssetFilename::from_path(&path) {
                Ok(parsed) => mapping.push((parsed.domain, name)),
                Err(e) => malformed.push((name, e)),
            }
        }
        Ok((mapping, malformed))
    }
}

fn validate_extension(extension: &str) -> Result<String, StorageError> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 5 || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(StorageError::UnsupportedExtension {
            extension: extension.to_string(),
        });
    }
    Ok(ext)
}
