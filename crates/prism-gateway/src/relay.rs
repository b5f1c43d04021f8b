use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use prism_common::ClientId;
use prism_media::{FrameFilter, FrameSource, MediaError, TransformKind, VideoFrame};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// One client's outgoing video as seen by the registry.
pub struct RelayEntry {
    id: Uuid,
    owner: ClientId,
    peer: ClientId,
    transform: TransformKind,
    source: Arc<dyn FrameSource>,
}

impl RelayEntry {
    /// Track id used for compare-and-delete.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> &ClientId {
        &self.owner
    }

    pub fn peer(&self) -> &ClientId {
        &self.peer
    }

    /// Transform the owner asked for on its call.
    pub fn transform(&self) -> TransformKind {
        self.transform
    }

    pub async fn recv_raw(&self) -> Result<VideoFrame, MediaError> {
        self.source.recv().await
    }
}

pub type RelayTrackHandle = Arc<RelayEntry>;

/// ClientId → the client's current relay entry. Last write wins.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    tracks: Arc<RwLock<HashMap<ClientId, RelayTrackHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `handle` under its owner; returns the entry it replaced.
    pub async fn register(&self, handle: RelayTrackHandle) -> Option<RelayTrackHandle> {
        let owner = handle.owner.clone();
        let id = handle.id;
        let replaced = self.tracks.write().await.insert(owner.clone(), handle);
        match &replaced {
            Some(old) => info!("relay track {} replaces {} for {}", id, old.id, owner),
            None => info!("relay track {} registered for {}", id, owner),
        }
        replaced
    }

    pub async fn lookup(&self, id: &ClientId) -> Option<RelayTrackHandle> {
        self.tracks.read().await.get(id).cloned()
    }

    /// Remove `owner`'s entry only if it is still `track_id`.
    pub async fn remove_if(&self, owner: &ClientId, track_id: Uuid) -> bool {
        let mut tracks = self.tracks.write().await;
        match tracks.get(owner) {
            Some(current) if current.id == track_id => {
                tracks.remove(owner);
                info!("relay track {} unregistered for {}", track_id, owner);
                true
            }
            Some(current) => {
                debug!(
                    "relay track {} for {} already superseded by {}",
                    track_id, owner, current.id
                );
                false
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.tracks.read().await.len()
    }
}

/// Where the next frame of a relay track comes from.
pub enum PullMode {
    /// Peer has no registered track: own raw frames.
    Direct,
    /// Peer's raw frames, filtered with the peer's transform.
    Relay(RelayTrackHandle),
}

/// Outbound video for one call leg.
///
/// Each pull re-checks the registry, so the track switches between direct
/// and relay mode as the peer's calls come and go.
pub struct VideoRelayTrack {
    entry: RelayTrackHandle,
    registry: SessionRegistry,
    filter: Arc<dyn FrameFilter>,
}

impl VideoRelayTrack {
    pub fn new(
        owner: ClientId,
        peer: ClientId,
        transform: TransformKind,
        source: Arc<dyn FrameSource>,
        registry: SessionRegistry,
        filter: Arc<dyn FrameFilter>,
    ) -> Self {
        let entry = Arc::new(RelayEntry {
            id: Uuid::new_v4(),
            owner,
            peer,
            transform,
            source,
        });
        Self {
            entry,
            registry,
            filter,
        }
    }

    pub fn handle(&self) -> RelayTrackHandle {
        self.entry.clone()
    }

    pub fn id(&self) -> Uuid {
        self.entry.id
    }

    pub async fn mode(&self) -> PullMode {
        match self.registry.lookup(&self.entry.peer).await {
            Some(handle) => PullMode::Relay(handle),
            None => PullMode::Direct,
        }
    }
}

#[async_trait]
impl FrameSource for VideoRelayTrack {
    async fn recv(&self) -> Result<VideoFrame, MediaError> {
        let peer = match self.mode().await {
            PullMode::Direct => return self.entry.recv_raw().await,
            PullMode::Relay(peer) => peer,
        };

        let frame = peer.recv_raw().await?;
        let kind = peer.transform;
        let filter = self.filter.clone();
        tokio::task::spawn_blocking(move || filter.apply(&frame, kind))
            .await
            .map_err(MediaError::filter)?
    }
}
