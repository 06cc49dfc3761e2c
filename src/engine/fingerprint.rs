//! DCT-based perceptual fingerprints.
//!
//! The low-frequency block of the image's DCT is thresholded against its
//! median, so roughly half the bits are set for any input. Fingerprints of rescaled or recompressed copies of a logo sit a few bits
//! apart; unrelated logos differ in roughly half their bits.

use image::GrayImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::fmt;
use thiserror::Error;

pub const SUPPORTED_SIDES: [u32; 2] = [8, 16];

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Unsupported fingerprint side {side}, expected 8 or 16")]
    UnsupportedSide { side: u32 },

    #[error("Invalid fingerprint hex '{hex}'")]
    InvalidHex { hex: String },
}

/// Fixed-width bit vector compared by Hamming distance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, FingerprintError> {
        hex::decode(hex)
            .map(Self::from_bytes)
            .map_err(|_| FingerprintError::InvalidHex {
                hex: hex.to_string(),
            })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn bit_len(&self) -> u32 {
        self.0.len() as u32 * 8
    }

    /// Number of differing bits. Bits past the end of the shorter
    /// fingerprint all count as differing.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        let common: u32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        common + self.bit_len().abs_diff(other.bit_len())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(bits: u64) -> Self {
        Self::from_bytes(bits.to_be_bytes().to_vec())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Computes fingerprints of normalized grayscale buffers. Stateless after
/// construction, so one generator is shared across worker threads.
pub struct FingerprintGenerator {
    hasher: Hasher,
    side: u32,
}

impl FingerprintGenerator {
    /// `side` x `side` bits: 8 gives the usual 64-bit pHash, 16 gives 256 bits.
    pub fn new(side: u32) -> Result<Self, FingerprintError> {
        if !SUPPORTED_SIDES.contains(&side) {
            return Err(FingerprintError::UnsupportedSide { side });
        }

        let hasher = HasherConfig::new()
            .hash_size(side, side)
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .to_hasher();

        Ok(Self { hasher, side })
    }

    pub fn bit_len(&self) -> u32 {
        self.side * self.side
    }

    pub fn fingerprint(&self, gray: &GrayImage) -> Fingerprint {
        let hash = self.hasher.hash_image(gray);
        Fingerprint::from_bytes(hash.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{bars_logo, mark_logo};

    #[test]
    fn test_distance() {
        let a = Fingerprint::from(0u64);
        let b = Fingerprint::from(0b1011u64);
        assert_eq!(a.distance(&b), 3);
        assert_eq!(b.distance(&a), 3);
        assert_eq!(a.distance(&a), 0);
        assert_eq!(Fingerprint::from(0u64).distance(&Fingerprint::from(u64::MAX)), 64);
    }

    #[test]
    fn test_hex_round_trip() {
        let fp = Fingerprint::from(0xdead_beef_0000_0001u64);
        assert_eq!(fp.to_hex(), "deadbeef00000001");
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert!(Fingerprint::from_hex("xyz").is_err());
    }

    #[test]
    fn test_unsupported_side() {
        assert!(FingerprintGenerator::new(8).is_ok());
        assert!(FingerprintGenerator::new(16).is_ok());
        assert!(matches!(
            FingerprintGenerator::new(5),
            Err(FingerprintError::UnsupportedSide { side: 5 })
        ));
    }

    #[test]
    fn test_fingerprint_width_and_determinism() {
        let generator = FingerprintGenerator::new(8).unwrap();
        let logo = mark_logo(128, 128);
        let first = generator.fingerprint(&logo);
        let second = generator.fingerprint(&logo);
        assert_eq!(first, second);
        assert_eq!(first.bit_len(), 64);
        assert_eq!(generator.bit_len(), 64);

        let wide = FingerprintGenerator::new(16).unwrap().fingerprint(&logo);
        assert_eq!(wide.bit_len(), 256);
    }

    #[test]
    fn test_buffer_hashes_like_dynamic_image() {
        let generator = FingerprintGenerator::new(8).unwrap();
        let logo = mark_logo(128, 200);
        let wrapped = generator
            .hasher
            .hash_image(&image::DynamicImage::ImageLuma8(logo.clone()));
        assert_eq!(generator.fingerprint(&logo).as_bytes(), wrapped.as_bytes());
    }

    #[test]
    fn test_rescaled_logo_is_close_unrelated_is_far() {
        let generator = FingerprintGenerator::new(8).unwrap();
        let large = generator.fingerprint(&mark_logo(128, 400));
        let small = generator.fingerprint(&mark_logo(128, 60));
        let other = generator.fingerprint(&bars_logo(128, 400));

        let near = large.distance(&small);
        let far = large.distance(&other);
        assert!(near <= 12, "rescaled copy too far: {}", near);
        assert!(near < far, "near={} far={}", near, far);
    }
}
