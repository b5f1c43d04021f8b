//! Seam between call setup and the peer-connection stack.

use std::sync::Arc;

use async_trait::async_trait;
use prism_common::SessionDescription;
use prism_media::FrameSource;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::relay::VideoRelayTrack;

#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The remote description could not be parsed or applied.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("negotiation failed: {0}")]
    Engine(String),
}

impl NegotiationError {
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        Self::InvalidDescription(msg.to_string())
    }

    pub fn engine(msg: impl std::fmt::Display) -> Self {
        Self::Engine(msg.to_string())
    }
}

/// Inbound remote video, one source per track as the remote peer adds them.
pub type InboundTracks = mpsc::Receiver<Arc<dyn FrameSource>>;

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Start a session for `remote`. Nothing is negotiated until
    /// [`NegotiationSession::negotiate`] runs.
    async fn open(
        &self,
        remote: SessionDescription,
    ) -> Result<Arc<dyn NegotiationSession>, NegotiationError>;
}

/// One server-side peer connection.
#[async_trait]
pub trait NegotiationSession: Send + Sync {
    /// Take the inbound video receiver. Only the first call gets it.
    async fn video_tracks(&self) -> Option<InboundTracks>;

    /// Apply the remote description and return the local answer.
    async fn negotiate(&self) -> Result<SessionDescription, NegotiationError>;

    /// Send `track` to the remote peer until either side ends.
    async fn attach_outbound(&self, track: VideoRelayTrack) -> Result<(), NegotiationError>;

    /// Resolves once the connection has failed or closed.
    async fn closed(&self);

    async fn close(&self);
}
