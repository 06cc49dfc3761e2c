pub mod bucket;
pub mod filename;
pub mod fingerprint;
pub mod graph;
pub mod normalize;
pub mod pipeline;
pub mod refine;
pub mod similarity;

/// Synthetic logos shared by the engine tests.
#[cfg(test)]
pub(crate) mod testing {
    use crate::engine::normalize::Normalizer;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    const INK: u8 = 20;
    const PAPER: u8 = 255;

    /// An off-center bar above a disc, drawn at `source` pixels square.
    pub fn mark_raw(source: u32) -> GrayImage {
        let s = source as f32;
        GrayImage::from_fn(source, source, |x, y| {
            let fx = (x as f32 + 0.5) / s;
            let fy = (y as f32 + 0.5) / s;
            let in_bar = (0.1..0.6).contains(&fx) && (0.15..0.4).contains(&fy);
            let in_disc = (fx - 0.7).powi(2) + (fy - 0.7).powi(2) <= 0.18f32.powi(2);
            Luma([if in_bar || in_disc { INK } else { PAPER }])
        })
    }

    /// Five horizontal bands, alternating dark and light.
    pub fn bars_raw(source: u32) -> GrayImage {
        GrayImage::from_fn(source, source, |_, y| {
            let band = (y * 5 / source).min(4);
            Luma([if band % 2 == 0 { INK } else { PAPER }])
        })
    }

    pub fn mark_logo(canvas: u32, source: u32) -> GrayImage {
        normalized(&mark_raw(source), canvas)
    }

    pub fn bars_logo(canvas: u32, source: u32) -> GrayImage {
        normalized(&bars_raw(source), canvas)
    }

    pub fn solid_logo(canvas: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(canvas, canvas, Luma([value]))
    }

    pub fn encode_png(gray: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(gray.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn normalized(raw: &GrayImage, canvas: u32) -> GrayImage {
        Normalizer::new(canvas, PAPER).normalize_image(&DynamicImage::ImageLuma8(raw.clone()))
    }
}
