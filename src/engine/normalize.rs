use image::{
    imageops::{self, FilterType},
    DynamicImage, GrayImage, Luma,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Image data is empty")]
    Empty,

    #[error("Expected a {expected}x{expected} grayscale buffer, got {width}x{height}")]
    WrongDimensions {
        expected: u32,
        width: u32,
        height: u32,
    },
}

/// Brings decoded logos to the canonical form every later stage assumes:
/// a `size`x`size` grayscale buffer, transparency flattened onto `background`
/// and the original aspect ratio kept by centering on a padded canvas.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    size: u32,
    background: u8,
}

impl Normalizer {
    pub fn new(size: u32, background: u8) -> Self {
        Self { size, background }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Decode raw asset bytes and normalize them.
    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<GrayImage, NormalizeError> {
        if bytes.is_empty() {
            return Err(NormalizeError::Empty);
        }
        if looks_like_svg(bytes) {
            return Err(NormalizeError::UnsupportedFormat {
                format: "svg (needs rasterizing first)".to_string(),
            });
        }

        let img = image::load_from_memory(bytes)?;
        Ok(self.normalize_image(&img))
    }

    pub fn normalize_image(&self, img: &DynamicImage) -> GrayImage {
        let flat = self.flatten(img);
        self.pad(&flat)
    }

    /// Accept a buffer that an upstream collaborator already normalized.
    pub fn accept_normalized(&self, gray: GrayImage) -> Result<GrayImage, NormalizeError> {
        let (width, height) = gray.dimensions();
        if width != self.size || height != self.size {
            return Err(NormalizeError::WrongDimensions {
                expected: self.size,
                width,
                height,
            });
        }
        Ok(gray)
    }

    fn flatten(&self, img: &DynamicImage) -> GrayImage {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let background = self.background as f32;
        let mut out = GrayImage::new(width, height);

        for (x, y, pixel) in rgba.enumerate_pixels() {
            let [r, g, b, a] = pixel.0;
            // ITU-R 601-2 luma
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            let alpha = a as f32 / 255.0;
            let value = luma * alpha + background * (1.0 - alpha);
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }

        out
    }

    fn pad(&self, gray: &GrayImage) -> GrayImage {
        let mut canvas = GrayImage::from_pixel(self.size, self.size, Luma([self.background]));
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return canvas;
        }

        let scale = (self.size as f64 / width as f64).min(self.size as f64 / height as f64);
        let new_width = ((width as f64 * scale).round() as u32).clamp(1, self.size);
        let new_height = ((height as f64 * scale).round() as u32).clamp(1, self.size);

        let resized = if (new_width, new_height) == (width, height) {
            gray.clone()
        } else {
            imageops::resize(gray, new_width, new_height, FilterType::Lanczos3)
        };

        let x = (self.size - new_width) / 2;
        let y = (self.size - new_height) / 2;
        imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
        canvas
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(img: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_output_is_canonical_size() {
        let normalizer = Normalizer::new(128, 255);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(300, 90, Rgba([10, 20, 30, 255])));
        let gray = normalizer.normalize_bytes(&encode_png(&img)).unwrap();
        assert_eq!(gray.dimensions(), (128, 128));
    }

    #[test]
    fn test_wide_image_is_padded_vertically() {
        let normalizer = Normalizer::new(128, 255);
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 32, Luma([0])));
        let gray = normalizer.normalize_image(&img);

        // 64x32 scales to 128x64, centered with 32 rows of padding above and below
        assert_eq!(gray.get_pixel(64, 0)[0], 255);
        assert_eq!(gray.get_pixel(64, 127)[0], 255);
        assert_eq!(gray.get_pixel(64, 64)[0], 0);
    }

    #[test]
    fn test_transparency_uses_background() {
        let normalizer = Normalizer::new(16, 255);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0])));
        let gray = normalizer.normalize_image(&img);
        assert!(gray.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_svg_is_rejected_as_unsupported() {
        let normalizer = Normalizer::new(128, 255);
        let svg = br#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg"></svg>"#;
        assert!(matches!(
            normalizer.normalize_bytes(svg),
            Err(NormalizeError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let normalizer = Normalizer::new(128, 255);
        assert!(matches!(
            normalizer.normalize_bytes(b"definitely not an image"),
            Err(NormalizeError::Image(_))
        ));
        assert!(matches!(normalizer.normalize_bytes(&[]), Err(NormalizeError::Empty)));
    }

    #[test]
    fn test_accept_normalized_checks_dimensions() {
        let normalizer = Normalizer::new(32, 255);
        assert!(normalizer
            .accept_normalized(GrayImage::new(32, 32))
            .is_ok());
        assert!(matches!(
            normalizer.accept_normalized(GrayImage::new(32, 16)),
            Err(NormalizeError::WrongDimensions { .. })
        ));
    }
}
