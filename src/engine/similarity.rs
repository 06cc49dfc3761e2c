//! Structural similarity (SSIM) between two normalized grayscale buffers.
//!
//! Uses a uniform 7x7 window with sample covariance and averages the index
//! over every window that fits entirely inside the image. Window sums come from
//! integer summed-area tables, so the score is exactly symmetric in its
//! arguments and identical inputs score exactly `1.0`.

use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SimilarityError {
    #[error("Image dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("Image {width}x{height} is smaller than the {window}x{window} window")]
    TooSmall { width: u32, height: u32, window: u32 },

    #[error("Window size {window} is below the minimum of 2")]
    InvalidWindow { window: u32 },
}

/// Pairwise structural scorer. Implementations must be symmetric.
pub trait StructuralScorer: Send + Sync {
    fn similarity(&self, a: &GrayImage, b: &GrayImage) -> Result<f64, SimilarityError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Ssim {
    window: u32,
    k1: f64,
    k2: f64,
    data_range: f64,
}

impl Default for Ssim {
    fn default() -> Self {
        Self {
            window: 7,
            k1: 0.01,
            k2: 0.03,
            data_range: 255.0,
        }
    }
}

impl Ssim {
    pub fn with_window(window: u32) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }
}

impl StructuralScorer for Ssim {
    fn similarity(&self, a: &GrayImage, b: &GrayImage) -> Result<f64, SimilarityError> {
        if a.dimensions() != b.dimensions() {
            return Err(SimilarityError::DimensionMismatch {
                left: a.dimensions(),
                right: b.dimensions(),
            });
        }
        // Sample covariance needs at least two pixels per window.
        if self.window < 2 {
            return Err(SimilarityError::InvalidWindow {
                window: self.window,
            });
        }
        let (width, height) = a.dimensions();
        if width < self.window || height < self.window {
            return Err(SimilarityError::TooSmall {
                width,
                height,
                window: self.window,
            });
        }

        let sum_a = SummedArea::pairwise(a, None);
        let sum_b = SummedArea::pairwise(b, None);
        let sum_aa = SummedArea::pairwise(a, Some(a));
        let sum_bb = SummedArea::pairwise(b, Some(b));
        let sum_ab = SummedArea::pairwise(a, Some(b));

        let c1 = (self.k1 * self.data_range).powi(2);
        let c2 = (self.k2 * self.data_range).powi(2);
        let n = (self.window * self.window) as f64;
        let cov_norm = n / (n - 1.0);

        let mut total = 0.0;
        let mut windows = 0usize;
        for y in 0..=(height - self.window) {
            for x in 0..=(width - self.window) {
                let ux = sum_a.window(x, y, self.window) as f64 / n;
                let uy = sum_b.window(x, y, self.window) as f64 / n;
                let uxx = sum_aa.window(x, y, self.window) as f64 / n;
                let uyy = sum_bb.window(x, y, self.window) as f64 / n;
                let uxy = sum_ab.window(x, y, self.window) as f64 / n;

                let vx = cov_norm * (uxx - ux * ux);
                let vy = cov_norm * (uyy - uy * uy);
                let vxy = cov_norm * (uxy - ux * uy);

                let numerator = (2.0 * (ux * uy) + c1) * (2.0 * vxy + c2);
                let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
                total += numerator / denominator;
                windows += 1;
            }
        }

        Ok(total / windows as f64)
    }
}

/// Integer summed-area table with a zero row and column prepended.
struct SummedArea {
    stride: usize,
    table: Vec<u64>,
}

impl SummedArea {
    /// Sums of `a`, or of the pixelwise product `a * b` when `b` is given.
    fn pairwise(a: &GrayImage, b: Option<&GrayImage>) -> Self {
        Self::from_fn(a.width(), a.height(), |x, y| {
            let left = a.get_pixel(x, y)[0] as u64;
            match b {
                Some(b) => left * b.get_pixel(x, y)[0] as u64,
                None => left,
            }
        })
    }

    fn from_fn(width: u32, height: u32, value: impl Fn(u32, u32) -> u64) -> Self {
        let stride = width as usize + 1;
        let mut table = vec![0u64; stride * (height as usize + 1)];
        for y in 0..height {
            let mut row = 0u64;
            for x in 0..width {
                row += value(x, y);
                let idx = (y as usize + 1) * stride + x as usize + 1;
                table[idx] = table[idx - stride] + row;
            }
        }
        Self { stride, table }
    }

    fn window(&self, x: u32, y: u32, size: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + size as usize, y0 + size as usize);
        self.table[y1 * self.stride + x1] + self.table[y0 * self.stride + x0]
            - self.table[y0 * self.stride + x1]
            - self.table[y1 * self.stride + x0]
    }
}
