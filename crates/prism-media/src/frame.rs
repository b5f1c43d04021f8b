use bytes::Bytes;
use image::RgbImage;

use crate::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit B, G, R.
    Bgr24,
    /// One H.264 access unit (Annex B) as re-assembled from RTP.
    H264,
}

impl PixelFormat {
    /// Whether the payload is addressable pixels rather than a bitstream.
    pub fn is_raw(self) -> bool {
        matches!(self, PixelFormat::Bgr24)
    }
}

/// Rational unit of a frame's `pts`, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// The 90 kHz clock used by RTP video.
    pub const RTP_VIDEO: TimeBase = TimeBase::new(1, 90_000);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn seconds(self, pts: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        pts as f64 * self.num as f64 / self.den as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
    pub pts: i64,
    pub time_base: TimeBase,
}

impl VideoFrame {
    /// Build a raw frame, checking that `data` holds exactly `width * height`
    /// BGR pixels.
    pub fn bgr24(
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
        pts: i64,
        time_base: TimeBase,
    ) -> Result<Self, MediaError> {
        let data = data.into();
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(MediaError::invalid_frame(format!(
                "{}x{} bgr24 needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format: PixelFormat::Bgr24,
            data,
            pts,
            time_base,
        })
    }

    /// Wrap an encoded sample; geometry is unknown until decoded.
    pub fn encoded(format: PixelFormat, data: impl Into<Bytes>, pts: i64, time_base: TimeBase) -> Self {
        Self {
            width: 0,
            height: 0,
            format,
            data: data.into(),
            pts,
            time_base,
        }
    }

    /// Presentation time in seconds.
    pub fn time(&self) -> f64 {
        self.time_base.seconds(self.pts)
    }

    pub(crate) fn to_image(&self) -> Result<RgbImage, MediaError> {
        if !self.format.is_raw() {
            return Err(MediaError::invalid_frame(format!(
                "{:?} frames carry no pixels",
                self.format
            )));
        }
        RgbImage::from_raw(self.width, self.height, self.data.to_vec())
            .ok_or_else(|| MediaError::invalid_frame("payload shorter than frame geometry"))
    }

    /// Rebuild a frame from processed pixels, keeping this frame's timing.
    pub(crate) fn with_pixels(&self, image: RgbImage) -> VideoFrame {
        VideoFrame {
            width: image.width(),
            height: image.height(),
            format: PixelFormat::Bgr24,
            data: Bytes::from(image.into_raw()),
            pts: self.pts,
            time_base: self.time_base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr24_rejects_wrong_length() {
        let err = VideoFrame::bgr24(2, 2, vec![0u8; 11], 0, TimeBase::RTP_VIDEO).unwrap_err();
        assert!(matches!(err, MediaError::InvalidFrame(_)));
        assert!(VideoFrame::bgr24(2, 2, vec![0u8; 12], 0, TimeBase::RTP_VIDEO).is_ok());
    }

    #[test]
    fn test_time_uses_time_base() {
        let frame = VideoFrame::encoded(PixelFormat::H264, vec![1u8], 180_000, TimeBase::RTP_VIDEO);
        assert!((frame.time() - 2.0).abs() < 1e-9);
        assert_eq!(TimeBase::new(1, 0).seconds(10), 0.0);
    }

    #[test]
    fn test_encoded_frames_have_no_pixels() {
        let frame = VideoFrame::encoded(PixelFormat::H264, vec![1u8, 2, 3], 0, TimeBase::RTP_VIDEO);
        assert!(frame.to_image().is_err());
    }
}
