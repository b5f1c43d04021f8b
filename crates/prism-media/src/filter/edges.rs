use image::RgbImage;
use imageproc::edges::canny;

use super::{bgr_to_gray, gray_to_bgr};

const LOW_THRESHOLD: f32 = 100.0;
const HIGH_THRESHOLD: f32 = 200.0;

/// Canny edge map, drawn white on black in all three channels.
pub(super) fn edges(image: &RgbImage) -> RgbImage {
    gray_to_bgr(&canny(&bgr_to_gray(image), LOW_THRESHOLD, HIGH_THRESHOLD))
}
