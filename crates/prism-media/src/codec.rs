//! H.264 transcoding between the wire and raw BGR frames.
//!
//! The codecs wrap `openh264` instances that are not shared across threads;
//! callers keep one per track on a blocking worker.

use openh264::decoder::Decoder;
use openh264::encoder::{Encoder, EncoderConfig};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use tracing::debug;

use crate::{MediaError, PixelFormat, VideoFrame};

fn codec_error(e: openh264::Error) -> MediaError {
    MediaError::codec(e)
}

/// Swap the outer channels of packed 24-bit pixels (RGB <-> BGR).
fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

pub struct H264Decoder {
    decoder: Decoder,
}

impl H264Decoder {
    pub fn new() -> Result<Self, MediaError> {
        Ok(Self {
            decoder: Decoder::new(OpenH264API::from_source()).map_err(codec_error)?,
        })
    }

    /// Decode one access unit into a BGR frame carrying the input's timing.
    ///
    /// Returns `None` while the decoder has no picture to show yet, e.g.
    /// before the first keyframe.
    pub fn decode(&mut self, frame: &VideoFrame) -> Result<Option<VideoFrame>, MediaError> {
        if frame.format != PixelFormat::H264 {
            return Err(MediaError::invalid_frame(format!(
                "cannot decode {:?} as H.264",
                frame.format
            )));
        }

        let Some(yuv) = self.decoder.decode(&frame.data).map_err(codec_error)? else {
            return Ok(None);
        };
        let (width, height) = yuv.dimension_rgb();
        let mut pixels = vec![0u8; width * height * 3];
        yuv.write_rgb8(&mut pixels);
        swap_red_blue(&mut pixels);

        VideoFrame::bgr24(width as u32, height as u32, pixels, frame.pts, frame.time_base).map(Some)
    }
}

/// Encodes BGR frames; the encoder is rebuilt whenever the frame size
/// changes.
#[derive(Default)]
pub struct H264Encoder {
    size: (u32, u32),
    encoder: Option<Encoder>,
}

impl H264Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one BGR frame. Odd widths and heights lose their last column
    /// or row, since the encoder works on 4:2:0 chroma.
    pub fn encode(&mut self, frame: &VideoFrame) -> Result<VideoFrame, MediaError> {
        if frame.format != PixelFormat::Bgr24 {
            return Err(MediaError::invalid_frame(format!(
                "cannot encode {:?} frames",
                frame.format
            )));
        }
        let (width, height) = (frame.width & !1, frame.height & !1);
        if width == 0 || height == 0 {
            return Err(MediaError::invalid_frame(format!(
                "{}x{} is too small to encode",
                frame.width, frame.height
            )));
        }

        if self.encoder.is_none() || self.size != (width, height) {
            debug!("starting H.264 encoder at {}x{}", width, height);
            let config = EncoderConfig::new(width, height);
            self.encoder = Some(Encoder::with_config(OpenH264API::from_source(), config).map_err(codec_error)?);
            self.size = (width, height);
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(MediaError::codec("encoder unavailable"));
        };

        let rgb = even_rgb(frame, width, height);
        let yuv = YUVBuffer::with_rgb(width as usize, height as usize, &rgb);
        let bitstream = encoder.encode(&yuv).map_err(codec_error)?;

        Ok(VideoFrame::encoded(
            PixelFormat::H264,
            bitstream.to_vec(),
            frame.pts,
            frame.time_base,
        ))
    }
}

/// RGB copy of `frame` cropped to `width` x `height`.
fn even_rgb(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let stride = frame.width as usize * 3;
    let row = width as usize * 3;
    let mut rgb = Vec::with_capacity(row * height as usize);
    for line in frame.data.chunks_exact(stride).take(height as usize) {
        rgb.extend_from_slice(&line[..row]);
    }
    swap_red_blue(&mut rgb);
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeBase;

    fn flat(width: u32, height: u32, bgr: [u8; 3], pts: i64) -> VideoFrame {
        let data: Vec<u8> = (0..width * height).flat_map(|_| bgr).collect();
        VideoFrame::bgr24(width, height, data, pts, TimeBase::RTP_VIDEO).unwrap()
    }

    #[test]
    fn test_swap_red_blue() {
        let mut px = vec![1u8, 2, 3, 4, 5, 6];
        swap_red_blue(&mut px);
        assert_eq!(px, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_even_rgb_crops_last_column_and_row() {
        let mut data = Vec::new();
        for y in 0..3u8 {
            for x in 0..3u8 {
                data.extend_from_slice(&[x, y, 9]);
            }
        }
        let frame = VideoFrame::bgr24(3, 3, data, 0, TimeBase::RTP_VIDEO).unwrap();
        let rgb = even_rgb(&frame, 2, 2);
        assert_eq!(rgb, vec![9, 0, 0, 9, 0, 1, 9, 1, 0, 9, 1, 1]);
    }

    #[test]
    fn test_encode_then_decode_keeps_picture() {
        let source = flat(64, 48, [40, 120, 200], 9000);
        let mut encoder = H264Encoder::new();
        let encoded = encoder.encode(&source).unwrap();
        assert_eq!(encoded.format, PixelFormat::H264);
        assert_eq!(encoded.pts, 9000);
        assert!(!encoded.data.is_empty());

        let mut decoder = H264Decoder::new().unwrap();
        let decoded = decoder.decode(&encoded).unwrap().expect("keyframe decodes");
        assert_eq!((decoded.width, decoded.height), (64, 48));
        assert_eq!(decoded.format, PixelFormat::Bgr24);
        assert_eq!(decoded.pts, 9000);

        let centre = ((24 * 64 + 32) * 3) as usize;
        for (got, want) in decoded.data[centre..centre + 3].iter().zip([40u8, 120, 200]) {
            assert!(got.abs_diff(want) <= 16, "got {} want {}", got, want);
        }
    }

    #[test]
    fn test_odd_frames_are_cropped_and_size_changes_restart_encoder() {
        let mut encoder = H264Encoder::new();
        let mut decoder = H264Decoder::new().unwrap();

        let first = encoder.encode(&flat(65, 49, [0, 0, 0], 0)).unwrap();
        let decoded = decoder.decode(&first).unwrap().expect("keyframe decodes");
        assert_eq!((decoded.width, decoded.height), (64, 48));

        let second = encoder.encode(&flat(96, 64, [0, 0, 0], 3000)).unwrap();
        let decoded = decoder.decode(&second).unwrap().expect("new stream decodes");
        assert_eq!((decoded.width, decoded.height), (96, 64));
    }

    #[test]
    fn test_wrong_formats_are_rejected() {
        let raw = flat(4, 4, [1, 2, 3], 0);
        let mut decoder = H264Decoder::new().unwrap();
        assert!(matches!(decoder.decode(&raw), Err(MediaError::InvalidFrame(_))));

        let encoded = VideoFrame::encoded(PixelFormat::H264, vec![0u8, 0, 0, 1], 0, TimeBase::RTP_VIDEO);
        assert!(matches!(
            H264Encoder::new().encode(&encoded),
            Err(MediaError::InvalidFrame(_))
        ));
        assert!(H264Encoder::new().encode(&flat(1, 1, [0, 0, 0], 0)).is_err());
    }
}
