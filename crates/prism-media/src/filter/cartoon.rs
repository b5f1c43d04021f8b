use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::median_filter;

use super::{bgr_to_gray, clamped};

const PYRAMID_LEVELS: usize = 2;
const BILATERAL_PASSES: usize = 6;
const BILATERAL_DIAMETER: i64 = 9;
const BILATERAL_SIGMA_COLOR: f64 = 9.0;
const BILATERAL_SIGMA_SPACE: f64 = 7.0;
const MEDIAN_RADIUS: u32 = 3;
const THRESHOLD_BLOCK: i64 = 9;
const THRESHOLD_C: i64 = 2;

/// Flattened colours masked by a thick adaptive-threshold outline.
pub(super) fn cartoon(image: &RgbImage) -> RgbImage {
    let color = flatten_colors(image);
    let gray = bgr_to_gray(image);
    let outline = adaptive_threshold(&median_filter(&gray, MEDIAN_RADIUS, MEDIAN_RADIUS));

    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let mask = outline.get_pixel(x, y).0[0];
        let [b, g, r] = color.get_pixel(x, y).0;
        Rgb([b & mask, g & mask, r & mask])
    })
}

fn flatten_colors(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();

    let mut sizes = vec![(width, height)];
    let mut small = image.clone();
    for _ in 0..PYRAMID_LEVELS {
        let w = small.width().div_ceil(2).max(1);
        let h = small.height().div_ceil(2).max(1);
        small = imageops::resize(&small, w, h, FilterType::Gaussian);
        sizes.push((w, h));
    }

    for _ in 0..BILATERAL_PASSES {
        small = bilateral(&small);
    }

    // Walk back up through the recorded sizes so the result matches the input.
    sizes.pop();
    while let Some((w, h)) = sizes.pop() {
        small = imageops::resize(&small, w, h, FilterType::Gaussian);
    }
    small
}

/// Edge-preserving smoothing over a disc of diameter 9; colour distance is
/// the L1 distance across channels.
fn bilateral(image: &RgbImage) -> RgbImage {
    let radius = BILATERAL_DIAMETER / 2;
    let space_coeff = -0.5 / (BILATERAL_SIGMA_SPACE * BILATERAL_SIGMA_SPACE);
    let color_coeff = -0.5 / (BILATERAL_SIGMA_COLOR * BILATERAL_SIGMA_COLOR);

    let mut window = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f64;
            if r2.sqrt() <= radius as f64 {
                window.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }
    let color_weight: Vec<f64> = (0..=255 * 3)
        .map(|d| ((d * d) as f64 * color_coeff).exp())
        .collect();

    let (width, height) = image.dimensions();
    let at = |x: i64, y: i64| -> [u8; 3] {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        image.get_pixel(cx, cy).0
    };

    RgbImage::from_fn(width, height, |x, y| {
        let centre = image.get_pixel(x, y).0;
        let mut sum = [0f64; 3];
        let mut norm = 0f64;
        for &(dx, dy, ws) in &window {
            let p = at(x as i64 + dx, y as i64 + dy);
            let dist: usize = (0..3)
                .map(|c| (p[c] as i32 - centre[c] as i32).unsigned_abs() as usize)
                .sum();
            let w = ws * color_weight[dist];
            for c in 0..3 {
                sum[c] += p[c] as f64 * w;
            }
            norm += w;
        }
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (sum[c] / norm).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

/// Binary threshold against the local 9x9 mean minus C.
fn adaptive_threshold(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);
    let radius = THRESHOLD_BLOCK / 2;
    let area = (THRESHOLD_BLOCK * THRESHOLD_BLOCK) as i64;

    // Separable box sum with replicated borders.
    let mut rows = vec![0i64; w * h];
    for y in 0..h {
        for x in 0..w {
            rows[y * w + x] = (-radius..=radius)
                .map(|dx| clamped(gray, x as i64 + dx, y as i64) as i64)
                .sum();
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let sum: i64 = (-radius..=radius)
            .map(|dy| {
                let yy = (y as i64 + dy).clamp(0, h as i64 - 1) as usize;
                rows[yy * w + x as usize]
            })
            .sum();
        let mean = (sum + area / 2) / area;
        let v = gray.get_pixel(x, y).0[0] as i64;
        Luma([if v > mean - THRESHOLD_C { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::split_frame;
    use crate::{FrameFilter, ImageFilter, TransformKind};

    #[test]
    fn test_flat_image_keeps_its_colour() {
        let image = RgbImage::from_pixel(20, 14, Rgb([40, 120, 200]));
        let out = cartoon(&image);
        assert_eq!(out.dimensions(), (20, 14));
        for px in out.pixels() {
            for (got, want) in px.0.iter().zip([40u8, 120, 200]) {
                assert!(got.abs_diff(want) <= 1, "got {:?}", px.0);
            }
        }
    }

    #[test]
    fn test_odd_sizes_round_trip_through_pyramid() {
        let image = RgbImage::from_pixel(13, 7, Rgb([10, 10, 10]));
        assert_eq!(flatten_colors(&image).dimensions(), (13, 7));
    }

    #[test]
    fn test_median_removes_isolated_speck() {
        let mut gray = GrayImage::from_pixel(9, 9, Luma([50]));
        gray.put_pixel(4, 4, Luma([250]));
        let blurred = median_filter(&gray, MEDIAN_RADIUS, MEDIAN_RADIUS);
        assert_eq!(blurred.get_pixel(4, 4).0[0], 50);
    }

    #[test]
    fn test_dark_side_of_step_is_outlined() {
        let mut gray = GrayImage::from_pixel(12, 4, Luma([200]));
        for y in 0..4 {
            for x in 0..6 {
                gray.put_pixel(x, y, Luma([20]));
            }
        }
        let mask = adaptive_threshold(&gray);
        // Just left of the step the local mean is pulled up by the bright side.
        assert_eq!(mask.get_pixel(5, 1).0[0], 0);
        // Far from the step the region is flat.
        assert_eq!(mask.get_pixel(0, 1).0[0], 255);
        assert_eq!(mask.get_pixel(11, 1).0[0], 255);
    }

    #[test]
    fn test_cartoon_is_deterministic() {
        let frame = split_frame(18, 10, 7);
        let a = ImageFilter.apply(&frame, TransformKind::Cartoon).unwrap();
        let b = ImageFilter.apply(&frame, TransformKind::Cartoon).unwrap();
        assert_eq!(a, b);
    }
}
