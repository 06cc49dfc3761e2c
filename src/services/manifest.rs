//! Batch manifests: one `domain,path` pair per line.
//!
//! Standard CSV quoting applies. A header line `domain,path`, blank lines and
//! `#` comments are ignored.
//! Relative paths resolve against the manifest's directory. A manifest that
//! cannot be read is fatal; individual bad lines are rejected and reported.

use crate::engine::filename::Domain;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Cannot read batch manifest {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub line: usize,
    pub domain: Domain,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub line: usize,
    pub content: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    pub rejected: Vec<RejectedLine>,
}

impl Manifest {
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self::parse(&text, base))
    }

    pub fn parse(text: &str, base: &Path) -> Self {
        let mut manifest = Manifest::default();
        let mut seen = HashSet::new();

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_reader(text.as_bytes());

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    manifest.rejected.push(RejectedLine {
                        line: e.position().map(|p| p.line() as usize).unwrap_or(0),
                        content: String::new(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
            if record.iter().all(str::is_empty) {
                continue;
            }
            if line == 1 && is_header(&record) {
                continue;
            }

            let reject = |reason: String| RejectedLine {
                line,
                content: record.iter().collect::<Vec<_>>().join(","),
                reason,
            };

            if record.len() != 2 {
                manifest
                    .rejected
                    .push(reject("expected `domain,path`".to_string()));
                continue;
            }

            let domain = match Domain::clean(&record[0]) {
                Ok(domain) => domain,
                Err(e) => {
                    manifest.rejected.push(reject(e.to_string()));
                    continue;
                }
            };

            let file = &record[1];
            if file.is_empty() {
                manifest.rejected.push(reject("missing path".to_string()));
                continue;
            }

            if !seen.insert(domain.clone()) {
                manifest
                    .rejected
                    .push(reject(format!("duplicate domain {}", domain)));
                continue;
            }

            let file = Path::new(file);
            let path = if file.is_absolute() {
                file.to_path_buf()
            } else {
                base.join(file)
            };
            manifest.entries.push(ManifestEntry { line, domain, path });
        }

        manifest
    }
}

fn is_header(record: &StringRecord) -> bool {
    record.len() == 2
        && record[0].eq_ignore_ascii_case("domain")
        && record[1].eq_ignore_ascii_case("path")
}
