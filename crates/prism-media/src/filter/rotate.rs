use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

/// Rotation speed of the `rotate` transform.
pub(super) const DEGREES_PER_SECOND: f64 = 45.0;

/// Rotate counter-clockwise by `degrees` about the image centre, sampling
/// bilinearly; uncovered pixels are black.
pub(super) fn rotate(image: &RgbImage, degrees: f64) -> RgbImage {
    // Whole turns keep the last row and column, which bilinear sampling drops.
    if degrees.rem_euclid(360.0) == 0.0 {
        return image.clone();
    }
    // imageproc turns clockwise for positive angles.
    let theta = -(degrees.to_radians() as f32);
    rotate_about_center(image, theta, Interpolation::Bilinear, Rgb([0, 0, 0]))
}
