//! Prism gateway: WebSocket presence and call signaling, `/call-user` call
//! setup, and the session registry behind filtered video relay.

pub mod call;
pub mod config;
pub mod negotiation;
pub mod presence;
pub mod relay;
pub mod rtc;
pub mod security;
pub mod session;
pub mod signal;

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use prism_common::ClientId;
use prism_media::{FrameFilter, ImageFilter};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

pub use config::GatewayConfig;
pub use negotiation::{NegotiationEngine, NegotiationError, NegotiationSession};
pub use presence::Presence;
pub use relay::{PullMode, RelayTrackHandle, SessionRegistry, VideoRelayTrack};
pub use rtc::WebRtcEngine;
pub use session::{CallSession, CallSessions};

use security::FixedWindowRateLimiter;

/// Process-wide state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub presence: Presence,
    pub registry: SessionRegistry,
    pub calls: CallSessions,
    pub engine: Arc<dyn NegotiationEngine>,
    pub filter: Arc<dyn FrameFilter>,
    pub call_limiter: Arc<FixedWindowRateLimiter<ClientId>>,
}

impl AppState {
    pub fn new(engine: Arc<dyn NegotiationEngine>) -> Self {
        Self::with_filter(engine, Arc::new(ImageFilter))
    }

    pub fn with_filter(engine: Arc<dyn NegotiationEngine>, filter: Arc<dyn FrameFilter>) -> Self {
        Self {
            presence: Presence::new(),
            registry: SessionRegistry::new(),
            calls: CallSessions::new(),
            engine,
            filter,
            call_limiter: Arc::new(FixedWindowRateLimiter::for_calls()),
        }
    }
}

impl FromRef<AppState> for Presence {
    fn from_ref(state: &AppState) -> Self {
        state.presence.clone()
    }
}

impl FromRef<AppState> for SessionRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<AppState> for CallSessions {
    fn from_ref(state: &AppState) -> Self {
        state.calls.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub connected_clients: usize,
    pub registered_tracks: usize,
    pub active_calls: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        connected_clients: state.presence.len().await,
        registered_tracks: state.registry.len().await,
        active_calls: state.calls.len().await,
    })
}

pub fn app(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(public_dir.join("index.html")))
        .route_service("/styles.css", ServeFile::new(public_dir.join("styles.css")))
        .route_service(
            "/scripts/index.js",
            ServeFile::new(public_dir.join("scripts").join("index.js")),
        )
        .route("/health", get(health))
        .route("/call-user", post(call::call_user))
        .route("/socket", get(signal::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
