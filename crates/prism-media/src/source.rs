use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{MediaError, VideoFrame};

/// A pull-based stream of video frames.
///
/// `recv` may wait for the network; once the producer is gone every call
/// returns [`MediaError::TrackEnded`].
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn recv(&self) -> Result<VideoFrame, MediaError>;
}

/// Frame source fed through a bounded channel.
pub struct ChannelSource {
    rx: Mutex<mpsc::Receiver<VideoFrame>>,
}

/// Create a channel-backed source and the sender that feeds it. Dropping
/// every sender ends the track.
pub fn channel_source(capacity: usize) -> (mpsc::Sender<VideoFrame>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource { rx: Mutex::new(rx) })
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&self) -> Result<VideoFrame, MediaError> {
        self.rx.lock().await.recv().await.ok_or(MediaError::TrackEnded)
    }
}
