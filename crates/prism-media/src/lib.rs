//! Video frames, pullable frame sources, the H.264 codec at the wire boundary
//! and the per-frame filters applied by the relay.

#![forbid(unsafe_code)]

pub mod codec;
mod error;
pub mod filter;
mod frame;
mod source;

pub use codec::{H264Decoder, H264Encoder};
pub use error::MediaError;
pub use filter::{FrameFilter, ImageFilter, TransformKind};
pub use frame::{PixelFormat, TimeBase, VideoFrame};
pub use source::{channel_source, ChannelSource, FrameSource};
