use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use prism_common::{ClientEvent, ClientId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::presence::{Outbox, Presence};
use crate::security::{FrameBudget, MAX_WS_TEXT_BYTES};
use crate::session::CallSessions;

const WS_OUTBOX_CAPACITY: usize = 128;
/// Hard transport cap; frames between this and the text limit get an error
/// event instead of a dropped socket.
const WS_MAX_MESSAGE_BYTES: usize = MAX_WS_TEXT_BYTES * 4;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(presence): State<Presence>,
    State(calls): State<CallSessions>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(WS_MAX_MESSAGE_BYTES)
        .max_frame_size(WS_MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, presence, calls, addr))
}

async fn handle_socket(stream: WebSocket, presence: Presence, calls: CallSessions, addr: SocketAddr) {
    let id = ClientId::generate();
    info!("client {} connected from {}", id, addr);

    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(WS_OUTBOX_CAPACITY);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode {}: {}", event.name(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
        let _ = disconnect_tx.try_send(());
    });

    let _ = tx.try_send(ServerEvent::Welcome {
        socket_id: id.clone(),
    });
    presence.connect(id.clone(), tx.clone()).await;

    let mut budget = FrameBudget::for_socket();
    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };

                if !budget.allow() {
                    warn!("client {} exceeded the frame rate limit", id);
                    reject(&tx, "rate limit exceeded");
                    break;
                }

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        reject(&tx, "binary frames are not supported");
                        continue;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if text.len() > MAX_WS_TEXT_BYTES {
                    reject(&tx, "message too large");
                    continue;
                }

                match ClientEvent::from_text(&text) {
                    Ok(event) => {
                        debug!("{} from {}", event.name(), id);
                        presence.dispatch(&id, event).await;
                    }
                    Err(e) => {
                        warn!("invalid event from {}: {}", id, e);
                        reject(&tx, &e.to_string());
                    }
                }
            }
        }
    }

    presence.disconnect(&id).await;
    let closed = calls.close_owned_by(&id).await;
    info!("client {} disconnected ({} calls closed)", id, closed);
}

fn reject(tx: &Outbox, message: &str) {
    let _ = tx.try_send(ServerEvent::Error {
        message: message.to_string(),
    });
}
