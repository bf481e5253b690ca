//! Grayscale frame type and image processing — luma decoding, dark-frame
//! detection, CLAHE contrast enhancement, and canonical face cropping.

use crate::types::{FaceCrop, FaceRect, FACE_CROP_SIZE};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("pixel data length {actual} does not match {width}x{height}")]
    InvalidLength { width: u32, height: u32, actual: usize },
}

/// A grayscale camera frame as delivered by the presentation shell.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw grayscale pixels.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = (width * height) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                width,
                height,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Convert a decoded image to a grayscale frame.
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let luma = img.to_luma8();
        Self {
            width: luma.width(),
            height: luma.height(),
            data: luma.into_raw(),
        }
    }

    /// Decode an image file (probe stills, enrollment samples).
    pub fn from_path(path: &Path) -> Result<Self, FrameError> {
        Ok(Self::from_image(&image::open(path)?))
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// True if more than `threshold_pct` of pixels fall in the darkest
    /// brightness bucket (0–31). Dark frames carry no usable face signal.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        if self.data.is_empty() {
            return true;
        }
        let dark = self.data.iter().filter(|&&p| p < 32).count();
        (dark as f32 / self.data.len() as f32) > threshold_pct
    }

    /// A contrast-enhanced copy. Both pipelines run this on incoming frames
    /// before detection, so training crops and probe crops share the same
    /// brightness-normalized domain.
    pub fn enhanced(&self) -> Frame {
        let mut out = self.clone();
        clahe_enhance(&mut out.data, out.width, out.height, CLAHE_TILES, CLAHE_CLIP_LIMIT);
        out
    }
}

/// CLAHE grid used for capture preprocessing.
pub const CLAHE_TILES: u32 = 8;
pub const CLAHE_CLIP_LIMIT: f32 = 0.02;

/// Sample a grayscale buffer at a fractional position with bilinear
/// interpolation, clamping to the nearest edge pixel.
pub(crate) fn sample_bilinear(data: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> f32 {
    let x0 = (sx.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (sy.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (sx - sx.floor()).clamp(0.0, 1.0);
    let fy = (sy - sy.floor()).clamp(0.0, 1.0);

    let tl = data[y0 * width + x0] as f32;
    let tr = data[y0 * width + x1] as f32;
    let bl = data[y1 * width + x0] as f32;
    let br = data[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Resize a grayscale buffer with bilinear interpolation.
pub(crate) fn resize_bilinear(
    data: &[u8],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
) -> Vec<u8> {
    let scale_x = width as f32 / new_width as f32;
    let scale_y = height as f32 / new_height as f32;
    let mut out = vec![0u8; new_width * new_height];

    for y in 0..new_height {
        let sy = (y as f32 + 0.5) * scale_y - 0.5;
        for x in 0..new_width {
            let sx = (x as f32 + 0.5) * scale_x - 0.5;
            let val = sample_bilinear(data, width, height, sx, sy);
            out[y * new_width + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Crop a detected face region and resample it to the canonical model input
/// size. Out-of-frame samples clamp to the nearest edge pixel.
pub fn crop_face(frame: &Frame, rect: &FaceRect) -> FaceCrop {
    let size = FACE_CROP_SIZE;
    let w = frame.width as usize;
    let h = frame.height as usize;
    let mut pixels = vec![0u8; size * size];

    for oy in 0..size {
        let sy = rect.y + (oy as f32 + 0.5) * rect.height / size as f32 - 0.5;
        for ox in 0..size {
            let sx = rect.x + (ox as f32 + 0.5) * rect.width / size as f32 - 0.5;
            let val = sample_bilinear(&frame.data, w, h, sx, sy);
            pixels[oy * size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    FaceCrop { pixels }
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in place.
///
/// The image is divided into a square grid of tiles; each tile gets a
/// clipped histogram and a CDF, and output pixels blend the four nearest
/// tile CDFs bilinearly.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return;
    }

    let grid = tiles as usize;
    let tile_w = w / grid;
    let tile_h = h / grid;
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(grid * grid);
    for row in 0..grid {
        for col in 0..grid {
            cdfs.push(tile_cdf(
                gray,
                w,
                col * tile_w,
                row * tile_h,
                tile_w,
                tile_h,
                clip_limit,
            ));
        }
    }

    for y in 0..h {
        let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (grid - 1) as f32);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(grid - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (grid - 1) as f32);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(grid - 1);
            let dx = fx - c0 as f32;

            let pixel = gray[y * w + x] as usize;
            let top = cdfs[r0 * grid + c0][pixel] * (1.0 - dx) + cdfs[r0 * grid + c1][pixel] * dx;
            let bot = cdfs[r1 * grid + c0][pixel] * (1.0 - dx) + cdfs[r1 * grid + c1][pixel] * dx;
            let val = top * (1.0 - dy) + bot * dy;

            gray[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Build the clipped, normalized CDF for one tile.
fn tile_cdf(
    gray: &[u8],
    stride: usize,
    x0: usize,
    y0: usize,
    tile_w: usize,
    tile_h: usize,
    clip_limit: f32,
) -> [f32; 256] {
    let tile_pixels = tile_w * tile_h;
    let mut hist = [0u32; 256];
    for y in y0..y0 + tile_h {
        for x in x0..x0 + tile_w {
            hist[gray[y * stride + x] as usize] += 1;
        }
    }

    // Clip and redistribute the excess evenly.
    let clip = (clip_limit * tile_pixels as f32) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redist = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += redist;
        if i < leftover {
            *bin += 1;
        }
    }

    let mut cdf = [0f32; 256];
    cdf[0] = hist[0] as f32;
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i] as f32;
    }
    let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
    let denom = tile_pixels as f32 - cdf_min;
    if denom > 0.0 {
        for v in cdf.iter_mut() {
            *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        }
    }
    cdf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(value: u8, width: u32, height: u32) -> Frame {
        Frame::from_gray(vec![value; (width * height) as usize], width, height).unwrap()
    }

    #[test]
    fn from_gray_rejects_bad_length() {
        assert!(Frame::from_gray(vec![0u8; 10], 4, 4).is_err());
        assert!(Frame::from_gray(vec![0u8; 16], 4, 4).is_ok());
    }

    #[test]
    fn from_image_converts_to_luma() {
        let rgb = image::RgbImage::from_pixel(8, 6, image::Rgb([200, 200, 200]));
        let frame = Frame::from_image(&image::DynamicImage::ImageRgb8(rgb));
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 6);
        assert_eq!(frame.data.len(), 48);
        assert!(frame.avg_brightness() > 150.0);
    }

    #[test]
    fn dark_frame_all_black() {
        assert!(flat_frame(0, 20, 20).is_dark(0.95));
    }

    #[test]
    fn dark_frame_normal() {
        assert!(!flat_frame(128, 20, 20).is_dark(0.95));
    }

    #[test]
    fn dark_frame_mostly_dark() {
        // 96% dark, 4% bright
        let mut data = vec![10u8; 960];
        data.extend(vec![128u8; 40]);
        let frame = Frame::from_gray(data, 40, 25).unwrap();
        assert!(frame.is_dark(0.95));
    }

    #[test]
    fn dark_frame_borderline_bright() {
        // 94% dark, 6% bright
        let mut data = vec![10u8; 940];
        data.extend(vec![128u8; 60]);
        let frame = Frame::from_gray(data, 40, 25).unwrap();
        assert!(!frame.is_dark(0.95));
    }

    #[test]
    fn resize_uniform_stays_uniform() {
        let data = vec![128u8; 100 * 100];
        let out = resize_bilinear(&data, 100, 100, 200, 200);
        assert_eq!(out.len(), 200 * 200);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn crop_face_canonical_size() {
        let frame = flat_frame(77, 640, 480);
        let rect = FaceRect {
            x: 100.0,
            y: 50.0,
            width: 200.0,
            height: 200.0,
            confidence: 0.9,
        };
        let crop = crop_face(&frame, &rect);
        assert_eq!(crop.pixels.len(), FACE_CROP_SIZE * FACE_CROP_SIZE);
        assert!(crop.pixels.iter().all(|&p| p == 77));
    }

    #[test]
    fn crop_face_identity_when_rect_matches_size() {
        // A full-frame rect on a frame already at canonical size copies pixels.
        let size = FACE_CROP_SIZE as u32;
        let data: Vec<u8> = (0..(size * size)).map(|i| (i % 251) as u8).collect();
        let frame = Frame::from_gray(data.clone(), size, size).unwrap();
        let rect = FaceRect {
            x: 0.0,
            y: 0.0,
            width: size as f32,
            height: size as f32,
            confidence: 1.0,
        };
        let crop = crop_face(&frame, &rect);
        assert_eq!(crop.pixels, data);
    }

    #[test]
    fn enhanced_preserves_dimensions_and_uniformity() {
        let frame = flat_frame(77, 96, 96);
        let enhanced = frame.enhanced();
        assert_eq!(enhanced.width, 96);
        assert_eq!(enhanced.height, 96);
        let first = enhanced.data[0];
        assert!(enhanced.data.iter().all(|&p| p == first));
        // The source frame is untouched.
        assert!(frame.data.iter().all(|&p| p == 77));
    }

    #[test]
    fn clahe_increases_contrast() {
        // Low-contrast 16x16 image, pixels between 100 and 110.
        let w = 16u32;
        let h = 16u32;
        let mut gray: Vec<u8> = (0..(w * h) as usize).map(|i| 100 + (i % 11) as u8).collect();

        let before = stddev(&gray);
        clahe_enhance(&mut gray, w, h, 2, 0.02);
        let after = stddev(&gray);

        assert!(after > before, "contrast should grow: {before:.2} -> {after:.2}");
    }

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let var = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        var.sqrt()
    }
}
