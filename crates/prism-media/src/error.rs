use thiserror::Error;

/// Failures surfaced by frame sources and filters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The underlying track stopped producing frames (peer went away).
    #[error("track ended")]
    TrackEnded,

    /// A frame's payload does not match its declared geometry.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The H.264 decoder or encoder rejected a frame.
    #[error("codec error: {0}")]
    Codec(String),

    /// The filter could not produce an output frame.
    #[error("filter failed: {0}")]
    Filter(String),
}

impl MediaError {
    pub fn invalid_frame(msg: impl std::fmt::Display) -> Self {
        Self::InvalidFrame(msg.to_string())
    }

    pub fn codec(msg: impl std::fmt::Display) -> Self {
        Self::Codec(msg.to_string())
    }

    pub fn filter(msg: impl std::fmt::Display) -> Self {
        Self::Filter(msg.to_string())
    }
}
