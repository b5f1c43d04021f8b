//! Roster of connected signaling clients and the call-control fan-out.
//!
//! Every connected client owns a bounded outbox drained by its socket writer.
//! Delivery is fire-and-forget: a missing target, a full outbox or a closed
//! socket drops the event and logs it.

use std::collections::HashMap;
use std::sync::Arc;

use prism_common::{ClientEvent, ClientId, ServerEvent};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub type Outbox = mpsc::Sender<ServerEvent>;

#[derive(Default)]
struct PresenceState {
    /// Connect order; never holds duplicates.
    roster: Vec<ClientId>,
    outboxes: HashMap<ClientId, Outbox>,
}

/// Process-wide presence and signaling router.
#[derive(Clone, Default)]
pub struct Presence {
    state: Arc<RwLock<PresenceState>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `id`: it receives the current roster, everyone else learns
    /// about it. Returns `false` (and does nothing) if `id` is already in.
    pub async fn connect(&self, id: ClientId, outbox: Outbox) -> bool {
        let mut state = self.state.write().await;
        if state.outboxes.contains_key(&id) {
            debug!("duplicate connect for {}", id);
            return false;
        }

        push(
            &outbox,
            &id,
            ServerEvent::UpdateUserList {
                users: state.roster.clone(),
            },
        );

        let announce = ServerEvent::UpdateUserList {
            users: vec![id.clone()],
        };
        for (other, tx) in &state.outboxes {
            push(tx, other, announce.clone());
        }

        state.roster.push(id.clone());
        state.outboxes.insert(id.clone(), outbox);
        info!("client {} joined ({} online)", id, state.roster.len());
        true
    }

    /// Drop `id` from the roster and tell every client, `id` included.
    /// Safe to call more than once; returns whether `id` was present.
    pub async fn disconnect(&self, id: &ClientId) -> bool {
        let mut state = self.state.write().await;
        let own_outbox = state.outboxes.remove(id);
        let position = state.roster.iter().position(|c| c == id);
        if let Some(position) = position {
            state.roster.remove(position);
            info!("client {} left ({} online)", id, state.roster.len());
        }

        let event = ServerEvent::RemoveUser {
            socket_id: id.clone(),
        };
        for (other, tx) in &state.outboxes {
            push(tx, other, event.clone());
        }
        if let Some(tx) = own_outbox {
            push(&tx, id, event);
        }
        position.is_some()
    }

    /// Route one client event to its handler.
    pub async fn dispatch(&self, from: &ClientId, event: ClientEvent) -> bool {
        match event {
            ClientEvent::CallUser { offer, to } => self.call_user(from, &to, offer).await,
            ClientEvent::MakeAnswer { answer, to } => self.make_answer(from, &to, answer).await,
            ClientEvent::RejectCall { from: caller } => self.reject_call(from, &caller).await,
        }
    }

    pub async fn call_user(&self, from: &ClientId, to: &ClientId, offer: Value) -> bool {
        self.send_to(
            to,
            ServerEvent::CallMade {
                offer,
                socket: from.clone(),
            },
        )
        .await
    }

    pub async fn make_answer(&self, from: &ClientId, to: &ClientId, answer: Value) -> bool {
        self.send_to(
            to,
            ServerEvent::AnswerMade {
                socket: from.clone(),
                answer,
            },
        )
        .await
    }

    pub async fn reject_call(&self, from: &ClientId, caller: &ClientId) -> bool {
        self.send_to(
            caller,
            ServerEvent::CallRejected {
                socket: from.clone(),
            },
        )
        .await
    }

    /// Tell `to` that a server-side media session now exists for `from`.
    pub async fn create_connection(&self, from: &ClientId, to: &ClientId) -> bool {
        self.send_to(to, ServerEvent::CreateConnection { from: from.clone() })
            .await
    }

    /// Deliver `event` to exactly one client.
    pub async fn send_to(&self, to: &ClientId, event: ServerEvent) -> bool {
        let tx = {
            let state = self.state.read().await;
            state.outboxes.get(to).cloned()
        };

        match tx {
            Some(tx) => push(&tx, to, event),
            None => {
                warn!("target client not connected: {} (dropped {})", to, event.name());
                false
            }
        }
    }

    pub async fn roster(&self) -> Vec<ClientId> {
        self.state.read().await.roster.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.roster.len()
    }
}

fn push(tx: &Outbox, to: &ClientId, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!("outbox full for {}; dropped {}", to, event.name());
            false
        }
        Err(TrySendError::Closed(event)) => {
            debug!("outbox closed for {}; dropped {}", to, event.name());
            false
        }
    }
}
