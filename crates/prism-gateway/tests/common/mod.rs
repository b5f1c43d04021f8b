//! Scripted negotiation engine shared by the gateway integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use prism_common::{SdpType, SessionDescription};
use prism_gateway::negotiation::InboundTracks;
use prism_gateway::{NegotiationEngine, NegotiationError, NegotiationSession, VideoRelayTrack};
use prism_media::{FrameFilter, FrameSource, MediaError, TransformKind, VideoFrame};
use tokio::sync::{mpsc, watch, Mutex};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Answer,
    /// `negotiate` rejects the remote description.
    InvalidDescription,
    /// `open` fails before a session exists.
    EngineFailure,
}

pub struct ScriptedEngine {
    outcome: Outcome,
    opened: AtomicUsize,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedEngine {
    pub fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            opened: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub async fn session(&self, index: usize) -> Arc<ScriptedSession> {
        self.sessions.lock().await[index].clone()
    }
}

#[async_trait]
impl NegotiationEngine for ScriptedEngine {
    async fn open(
        &self,
        remote: SessionDescription,
    ) -> Result<Arc<dyn NegotiationSession>, NegotiationError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.outcome == Outcome::EngineFailure {
            return Err(NegotiationError::engine("no transport available"));
        }

        let (track_tx, track_rx) = mpsc::channel(4);
        let (closed, _) = watch::channel(false);
        let session = Arc::new(ScriptedSession {
            outcome: self.outcome,
            remote,
            tracks: Mutex::new(Some(track_rx)),
            track_tx,
            closed,
            close_calls: AtomicUsize::new(0),
            attached: Mutex::new(Vec::new()),
        });
        self.sessions.lock().await.push(session.clone());
        Ok(session)
    }
}

pub struct ScriptedSession {
    outcome: Outcome,
    remote: SessionDescription,
    tracks: Mutex<Option<InboundTracks>>,
    track_tx: mpsc::Sender<Arc<dyn FrameSource>>,
    closed: watch::Sender<bool>,
    close_calls: AtomicUsize,
    attached: Mutex<Vec<Arc<VideoRelayTrack>>>,
}

impl ScriptedSession {
    /// Simulate the remote peer adding a video track.
    pub async fn add_remote_track(&self, source: Arc<dyn FrameSource>) {
        let _ = self.track_tx.send(source).await;
    }

    /// Simulate the peer connection dropping.
    pub fn drop_connection(&self) {
        self.closed.send_replace(true);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub async fn attached(&self) -> Vec<Arc<VideoRelayTrack>> {
        self.attached.lock().await.clone()
    }
}

#[async_trait]
impl NegotiationSession for ScriptedSession {
    async fn video_tracks(&self) -> Option<InboundTracks> {
        self.tracks.lock().await.take()
    }

    async fn negotiate(&self) -> Result<SessionDescription, NegotiationError> {
        match self.outcome {
            Outcome::Answer => Ok(SessionDescription::new(
                SdpType::Answer,
                format!("answer to {}", self.remote.sdp),
            )),
            _ => Err(NegotiationError::invalid("unparseable offer")),
        }
    }

    async fn attach_outbound(&self, track: VideoRelayTrack) -> Result<(), NegotiationError> {
        self.attached.lock().await.push(Arc::new(track));
        Ok(())
    }

    async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// Replaces the payload with the transform name so tests can see which
/// transform ran.
pub struct TagFilter;

impl FrameFilter for TagFilter {
    fn apply(&self, frame: &VideoFrame, kind: TransformKind) -> Result<VideoFrame, MediaError> {
        let mut out = frame.clone();
        out.data = Bytes::from(kind.as_str().as_bytes().to_vec());
        Ok(out)
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
