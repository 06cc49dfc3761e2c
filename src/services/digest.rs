//! Content Digest Store: exact-duplicate detection persisted across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt digest index {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("Invalid content digest '{value}'")]
    InvalidDigest { value: String },
}

/// 128-bit BLAKE3 digest of an asset's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        Self::finish(&hasher)
    }

    /// Stream a file through the hasher without loading it whole.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self::finish(&hasher))
    }

    fn finish(hasher: &blake3::Hasher) -> Self {
        let mut out = [0u8; 16];
        hasher.finalize_xof().fill(&mut out);
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = DigestStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out).map_err(|_| DigestStoreError::InvalidDigest {
            value: s.to_string(),
        })?;
        Ok(Self(out))
    }
}

/// In-memory digest -> canonical filename mapping. Each digest keeps the
/// first filename recorded for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestIndex {
    entries: BTreeMap<ContentDigest, String>,
}

impl DigestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, digest: &ContentDigest) -> Option<&str> {
        self.entries.get(digest).map(String::as_str)
    }

    /// Record `filename` for `digest` unless one is already recorded, and
    /// return the canonical filename either way.
    pub fn record(&mut self, digest: ContentDigest, filename: impl Into<String>) -> &str {
        self.entries.entry(digest).or_insert_with(|| filename.into())
    }

    /// Overwrite whatever filename is recorded for `digest`.
    pub fn replace(&mut self, digest: ContentDigest, filename: impl Into<String>) {
        self.entries.insert(digest, filename.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentDigest, &str)> {
        self.entries.iter().map(|(d, f)| (d, f.as_str()))
    }
}

/// Backing storage for a [`DigestIndex`].
pub trait DigestStore {
    /// Load the persisted mapping. Absent, empty or corrupt state all come
    /// back as an empty index; corruption is logged, never merged.
    fn load_all(&self) -> DigestIndex;

    fn persist(&self, index: &DigestIndex) -> Result<(), DigestStoreError>;
}

/// JSON object of `{ "<hex digest>": "<filename>" }`.
#[derive(Debug, Clone)]
pub struct JsonDigestStore {
    path: PathBuf,
}

impl JsonDigestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Like [`DigestStore::load_all`] but reports corruption instead of
    /// recovering from it.
    pub fn load_checked(&self) -> Result<DigestIndex, DigestStoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DigestIndex::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(DigestIndex::new());
        }

        let corrupt = |message: String| DigestStoreError::Corrupt {
            path: self.path.display().to_string(),
            message,
        };

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;

        let mut index = DigestIndex::new();
        for (digest, filename) in raw {
            let digest: ContentDigest = digest.parse().map_err(|e| corrupt(format!("{}", e)))?;
            if filename.trim().is_empty() {
                return Err(corrupt(format!("empty filename for {}", digest)));
            }
            index.record(digest, filename);
        }
        Ok(index)
    }
}

impl DigestStore for JsonDigestStore {
    fn load_all(&self) -> DigestIndex {
        match self.load_checked() {
            Ok(index) => {
                log::info!(
                    "Loaded {} content digests from {}",
                    index.len(),
                    self.path.display()
                );
                index
            }
            Err(e) => {
                log::warn!("Starting with an empty digest index: {}", e);
                DigestIndex::new()
            }
        }
    }

    fn persist(&self, index: &DigestIndex) -> Result<(), DigestStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let raw: BTreeMap<String, &str> = index.iter().map(|(d, f)| (d.to_hex(), f)).collect();
        let json = serde_json::to_string_pretty(&raw).map_err(|e| DigestStoreError::Corrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        // Write beside the target and rename so a crash never leaves a torn file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        log::info!(
            "Persisted {} content digests to {}",
            index.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// One run's view of the digest index: loaded when opened, flushed once by
/// [`DigestSession::finish`]. Dropping a session without finishing it loses
/// the run's new entries.
pub struct DigestSession<'a, S: DigestStore> {
    store: &'a S,
    index: DigestIndex,
}

impl<'a, S: DigestStore> DigestSession<'a, S> {
    pub fn open(store: &'a S) -> Self {
        Self {
            index: store.load_all(),
            store,
        }
    }

    pub fn index(&self) -> &DigestIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut DigestIndex {
        &mut self.index
    }

    pub fn finish(self) -> Result<DigestIndex, DigestStoreError> {
        self.store.persist(&self.index)?;
        Ok(self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryStore {
        saved: RefCell<Option<DigestIndex>>,
        persists: RefCell<usize>,
    }

    impl DigestStore for MemoryStore {
        fn load_all(&self) -> DigestIndex {
            self.saved.borrow().clone().unwrap_or_default()
        }

        fn persist(&self, index: &DigestIndex) -> Result<(), DigestStoreError> {
            *self.saved.borrow_mut() = Some(index.clone());
            *self.persists.borrow_mut() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_digest_is_128_bits_and_stable() {
        let a = ContentDigest::of_bytes(b"logo bytes");
        let b = ContentDigest::of_bytes(b"logo bytes");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
        assert_ne!(a, ContentDigest::of_bytes(b"other logo bytes"));
        assert_eq!(a.to_hex().parse::<ContentDigest>().unwrap(), a);
    }

    #[test]
    fn test_file_digest_matches_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logo.png");
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();
        assert_eq!(
            ContentDigest::of_file(&path).unwrap(),
            ContentDigest::of_bytes(&content)
        );
    }

    #[test]
    fn test_record_keeps_first_filename() {
        let mut index = DigestIndex::new();
        let digest = ContentDigest::of_bytes(b"same bytes");
        assert_eq!(index.record(digest, "acme_com_1.png"), "acme_com_1.png");
        assert_eq!(index.record(digest, "acme_org_2.png"), "acme_com_1.png");
        assert_eq!(index.lookup(&digest), Some("acme_com_1.png"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDigestStore::new(temp_dir.path().join("state").join("digests.json"));

        let mut index = DigestIndex::new();
        index.record(ContentDigest::of_bytes(b"a"), "a_com_1.png");
        index.record(ContentDigest::of_bytes(b"b"), "b_com_2.png");
        store.persist(&index).unwrap();

        assert_eq!(store.load_checked().unwrap(), index);
        assert_eq!(store.load_all(), index);
    }

    #[test]
    fn test_absent_and_empty_files_are_empty_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDigestStore::new(temp_dir.path().join("digests.json"));
        assert!(store.load_checked().unwrap().is_empty());

        fs::write(store.path(), "  \n").unwrap();
        assert!(store.load_checked().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_state_resets_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDigestStore::new(temp_dir.path().join("digests.json"));

        fs::write(store.path(), "{\"not json").unwrap();
        assert!(matches!(
            store.load_checked(),
            Err(DigestStoreError::Corrupt { .. })
        ));
        assert!(store.load_all().is_empty());

        // One garbled key poisons the whole file rather than being merged around
        let good = ContentDigest::of_bytes(b"good").to_hex();
        fs::write(
            store.path(),
            format!("{{\"{}\": \"good_com_1.png\", \"zz\": \"bad_com_2.png\"}}", good),
        )
        .unwrap();
        assert!(store.load_checked().is_err());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_session_flushes_once_on_finish() {
        let store = MemoryStore::default();
        let digest = ContentDigest::of_bytes(b"logo");

        let mut session = DigestSession::open(&store);
        session.index_mut().record(digest, "logo_com_1.png");
        assert_eq!(*store.persists.borrow(), 0);
        session.finish().unwrap();
        assert_eq!(*store.persists.borrow(), 1);

        let reopened = DigestSession::open(&store);
        assert_eq!(reopened.index().lookup(&digest), Some("logo_com_1.png"));
    }

    #[test]
    fn test_dropped_session_does_not_flush() {
        let store = MemoryStore::default();
        {
            let mut session = DigestSession::open(&store);
            session
                .index_mut()
                .record(ContentDigest::of_bytes(b"x"), "x_com_1.png");
        }
        assert!(store.load_all().is_empty());
    }
}
