//! Per-frame pixel transforms.
//!
//! The relay applies one [`TransformKind`] to each frame through a
//! [`FrameFilter`]. [`ImageFilter`] is the built-in implementation; every
//! transform is a pure function of the input frame (and, for `rotate`, its
//! presentation time).

mod cartoon;
mod edges;
mod rotate;

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{MediaError, VideoFrame};

/// Transform requested by the peer whose video is being relayed.
///
/// Unknown names parse to [`TransformKind::None`] (identity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformKind {
    #[default]
    None,
    Cartoon,
    Edges,
    Rotate,
}

impl TransformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformKind::None => "none",
            TransformKind::Cartoon => "cartoon",
            TransformKind::Edges => "edges",
            TransformKind::Rotate => "rotate",
        }
    }
}

impl From<&str> for TransformKind {
    fn from(value: &str) -> Self {
        match value {
            "cartoon" => TransformKind::Cartoon,
            "edges" => TransformKind::Edges,
            "rotate" => TransformKind::Rotate,
            _ => TransformKind::None,
        }
    }
}

impl From<String> for TransformKind {
    fn from(value: String) -> Self {
        TransformKind::from(value.as_str())
    }
}

impl From<TransformKind> for String {
    fn from(kind: TransformKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for TransformKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TransformKind::from(s))
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless per-frame transform.
///
/// Implementations must return a frame carrying the input's `pts` and
/// `time_base`.
pub trait FrameFilter: Send + Sync {
    fn apply(&self, frame: &VideoFrame, kind: TransformKind) -> Result<VideoFrame, MediaError>;
}

/// Pure-Rust filter operating on raw BGR frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFilter;

impl FrameFilter for ImageFilter {
    fn apply(&self, frame: &VideoFrame, kind: TransformKind) -> Result<VideoFrame, MediaError> {
        if kind == TransformKind::None {
            return Ok(frame.clone());
        }
        if !frame.format.is_raw() {
            // Engines decode before relaying; a bitstream that got here is forwarded as-is.
            trace!("{} skipped for {:?} frame", kind, frame.format);
            return Ok(frame.clone());
        }

        let image = frame.to_image()?;
        if image.width() == 0 || image.height() == 0 {
            return Ok(frame.clone());
        }

        let output = match kind {
            TransformKind::Cartoon => cartoon::cartoon(&image),
            TransformKind::Edges => edges::edges(&image),
            TransformKind::Rotate => rotate::rotate(&image, frame.time() * rotate::DEGREES_PER_SECOND),
            TransformKind::None => image,
        };
        Ok(frame.with_pixels(output))
    }
}

/// Luma of a BGR image (ITU-R BT.601 weights).
fn bgr_to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [b, g, r] = image.get_pixel(x, y).0;
        let luma = 0.114 * b as f32 + 0.587 * g as f32 + 0.299 * r as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

fn gray_to_bgr(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Sample with replicated borders.
fn clamped(gray: &GrayImage, x: i64, y: i64) -> u8 {
    let cx = x.clamp(0, gray.width() as i64 - 1) as u32;
    let cy = y.clamp(0, gray.height() as i64 - 1) as u32;
    gray.get_pixel(cx, cy).0[0]
}
