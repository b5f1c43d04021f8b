use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use prism_common::ClientId;
use prism_media::TransformKind;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::negotiation::NegotiationSession;

/// One answered `/call-user` leg and its peer connection.
#[derive(Clone)]
pub struct CallSession {
    pub id: Uuid,
    pub from: ClientId,
    pub to: ClientId,
    pub transform: TransformKind,
    pub is_caller: bool,
    pub created_at: Instant,
    pub connection: Arc<dyn NegotiationSession>,
}

pub type CallMap = Arc<RwLock<HashMap<Uuid, CallSession>>>;

/// Live call sessions, so they can be closed when their owner leaves or the
/// server stops.
#[derive(Clone, Default)]
pub struct CallSessions {
    calls: CallMap,
}

impl CallSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call: CallSession) {
        self.calls.write().await.insert(call.id, call);
    }

    pub async fn remove(&self, id: Uuid) -> Option<CallSession> {
        let removed = self.calls.write().await.remove(&id);
        if let Some(call) = &removed {
            info!(
                "call {} ({} -> {}) ended after {:?}",
                call.id,
                call.from,
                call.to,
                call.created_at.elapsed()
            );
        }
        removed
    }

    /// Close every session whose caller leg belongs to `owner`.
    pub async fn close_owned_by(&self, owner: &ClientId) -> usize {
        let owned: Vec<CallSession> = self
            .calls
            .read()
            .await
            .values()
            .filter(|call| &call.from == owner)
            .cloned()
            .collect();

        for call in &owned {
            info!("closing call {} owned by {}", call.id, owner);
            call.connection.close().await;
        }
        owned.len()
    }

    pub async fn close_all(&self) -> usize {
        let all: Vec<CallSession> = self.calls.read().await.values().cloned().collect();
        for call in &all {
            call.connection.close().await;
        }
        if !all.is_empty() {
            info!("closed {} call sessions", all.len());
        }
        all.len()
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }
}
