//! Stored asset filenames and the domains they encode.
//!
//! Stored logos are named `{domain with '.' replaced by '_'}_{disambiguator}.{ext}`,
//! where the disambiguator is either a unix timestamp or a 32 character hex
//! content digest. Parsing is strict: anything that does not round-trip through
//! [`AssetFilename`]'s `Display` impl is rejected instead of guessed at.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const DIGEST_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("Filename is not valid UTF-8: {name}")]
    NotUtf8 { name: String },

    #[error("Filename has no lower-case extension: {name}")]
    MissingExtension { name: String },

    #[error("Filename has no disambiguator segment: {name}")]
    MissingDisambiguator { name: String },

    #[error("Invalid disambiguator '{segment}' in {name}")]
    InvalidDisambiguator { name: String, segment: String },

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: &'static str },
}

/// A validated, lower-case domain name with at least two labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    pub fn parse(raw: &str) -> Result<Self, FilenameError> {
        let invalid = |reason| FilenameError::InvalidDomain {
            domain: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(invalid("empty"));
        }

        let labels: Vec<&str> = raw.split('.').collect();
        if labels.len() < 2 {
            return Err(invalid("needs at least two labels"));
        }

        for label in &labels {
            if label.is_empty() {
                return Err(invalid("empty label"));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid("label starts or ends with '-'"));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            {
                return Err(invalid("labels may only contain a-z, 0-9 and '-'"));
            }
        }

        Ok(Self(raw.to_string()))
    }

    /// Clean a raw domain as it appears in scraped domain lists: trims
    /// whitespace, lower-cases and strips trailing separators.
    pub fn clean(raw: &str) -> Result<Self, FilenameError> {
        let cleaned = raw
            .trim()
            .to_lowercase()
            .trim_end_matches([' ', ',', '/', '\\'])
            .to_string();
        Self::parse(&cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Domain {
    type Error = FilenameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Domain::parse(&value)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Disambiguator {
    Timestamp(u64),
    Digest(String),
}

impl fmt::Display for Disambiguator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disambiguator::Timestamp(ts) => write!(f, "{}", ts),
            Disambiguator::Digest(hex) => f.write_str(hex),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetFilename {
    pub domain: Domain,
    pub disambiguator: Disambiguator,
    pub extension: String,
}

impl AssetFilename {
    pub fn new(domain: Domain, disambiguator: Disambiguator, extension: &str) -> Self {
        Self {
            domain,
            disambiguator,
            extension: extension.to_ascii_lowercase(),
        }
    }

    /// Parse the final component of `path`.
    pub fn from_path(path: &Path) -> Result<Self, FilenameError> {
        let name = path.file_name().unwrap_or_default();
        let name = name.to_str().ok_or_else(|| FilenameError::NotUtf8 {
            name: name.to_string_lossy().into_owned(),
        })?;
        name.parse()
    }
}

impl FromStr for AssetFilename {
    type Err = FilenameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty()
                    && !ext.is_empty()
                    && ext.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) =>
            {
                (stem, ext)
            }
            _ => {
                return Err(FilenameError::MissingExtension {
                    name: name.to_string(),
                })
            }
        };

        let (encoded_domain, segment) =
            stem.rsplit_once('_')
                .ok_or_else(|| FilenameError::MissingDisambiguator {
                    name: name.to_string(),
                })?;

        let disambiguator = parse_disambiguator(segment).ok_or_else(|| {
            FilenameError::InvalidDisambiguator {
                name: name.to_string(),
                segment: segment.to_string(),
            }
        })?;

        // Dots never appear in the encoded form, so a dotted stem would not round-trip.
        if encoded_domain.contains('.') {
            return Err(FilenameError::InvalidDomain {
                domain: encoded_domain.to_string(),
                reason: "encoded domain must use '_' as label separator",
            });
        }
        let domain = Domain::parse(&encoded_domain.replace('_', "."))?;

        Ok(Self {
            domain,
            disambiguator,
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for AssetFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}.{}",
            self.domain.as_str().replace('.', "_"),
            self.disambiguator,
            self.extension
        )
    }
}

fn parse_disambiguator(segment: &str) -> Option<Disambiguator> {
    if segment.len() == DIGEST_HEX_LEN
        && segment
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Some(Disambiguator::Digest(segment.to_string()));
    }
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // A leading zero would not survive formatting back to text.
    if segment.len() > 1 && segment.starts_with('0') {
        return None;
    }
    segment.parse().ok().map(Disambiguator::Timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamped_filename() {
        let parsed: AssetFilename = "shop_example_co_uk_1718000000.png".parse().unwrap();
        assert_eq!(parsed.domain.as_str(), "shop.example.co.uk");
        assert_eq!(parsed.disambiguator, Disambiguator::Timestamp(1718000000));
        assert_eq!(parsed.extension, "png");
    }

    #[test]
    fn test_parse_digest_disambiguator() {
        let name = "acme-corp_com_0123456789abcdef0123456789abcdef.svg";
        let parsed: AssetFilename = name.parse().unwrap();
        assert_eq!(parsed.domain.as_str(), "acme-corp.com");
        assert!(matches!(parsed.disambiguator, Disambiguator::Digest(_)));
    }

    #[test]
    fn test_round_trip() {
        for name in [
            "example_com_1.png",
            "a_b_c_d_42.jpg",
            "x1_io_ffffffffffffffffffffffffffffffff.webp",
        ] {
            let parsed: AssetFilename = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
    }

    #[test]
    fn test_build_then_parse() {
        let domain = Domain::parse("logos.example.org").unwrap();
        let filename =
            AssetFilename::new(domain.clone(), Disambiguator::Timestamp(17), "PNG");
        let name = filename.to_string();
        assert_eq!(name, "logos_example_org_17.png");
        assert_eq!(name.parse::<AssetFilename>().unwrap().domain, domain);
    }

    #[test]
    fn test_malformed_filenames_are_rejected() {
        assert!(matches!(
            "example_com_123".parse::<AssetFilename>(),
            Err(FilenameError::MissingExtension { .. })
        ));
        assert!(matches!(
            "examplecom.png".parse::<AssetFilename>(),
            Err(FilenameError::MissingDisambiguator { .. })
        ));
        assert!(matches!(
            "example_com_latest.png".parse::<AssetFilename>(),
            Err(FilenameError::InvalidDisambiguator { .. })
        ));
        assert!(matches!(
            "localhost_123.png".parse::<AssetFilename>(),
            Err(FilenameError::InvalidDomain { .. })
        ));
        assert!(matches!(
            "example.com_123.png".parse::<AssetFilename>(),
            Err(FilenameError::InvalidDomain { .. })
        ));
        assert!(matches!(
            "Example_com_123.png".parse::<AssetFilename>(),
            Err(FilenameError::InvalidDomain { .. })
        ));
        assert!(matches!(
            "example__com_123.png".parse::<AssetFilename>(),
            Err(FilenameError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn test_clean_domain() {
        assert_eq!(Domain::clean("  Example.COM/ ").unwrap().as_str(), "example.com");
        assert_eq!(Domain::clean("shop.example.com,").unwrap().as_str(), "shop.example.com");
        assert!(Domain::clean("   ").is_err());
    }
}
