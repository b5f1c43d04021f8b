//! `POST /call-user`: answer a browser's offer with a server-side peer
//! connection whose outbound video is a relay track.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use prism_common::{ClientId, SdpType, SessionDescription};
use prism_media::{FrameSource, TransformKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::negotiation::{InboundTracks, NegotiationError};
use crate::relay::VideoRelayTrack;
use crate::security::MAX_SDP_BYTES;
use crate::session::CallSession;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct CallUserRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub video_transform: Option<TransformKind>,
    pub from: ClientId,
    pub to: ClientId,
    #[serde(default)]
    pub is_caller: bool,
}

impl CallUserRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.sdp.trim().is_empty() {
            return Err(ApiError::BadRequest("sdp must not be empty".into()));
        }
        if self.sdp.len() > MAX_SDP_BYTES {
            return Err(ApiError::BadRequest(format!(
                "sdp exceeds {} bytes",
                MAX_SDP_BYTES
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("too many call attempts")]
    RateLimited,

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Negotiation(NegotiationError::InvalidDescription(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Negotiation(NegotiationError::Engine(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub async fn call_user(
    State(state): State<AppState>,
    payload: Result<Json<CallUserRequest>, JsonRejection>,
) -> Result<Json<SessionDescription>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.validate()?;

    if !state.call_limiter.allow(&request.from) {
        warn!("call setup rate limit hit for {}", request.from);
        return Err(ApiError::RateLimited);
    }

    let CallUserRequest {
        sdp,
        sdp_type,
        video_transform,
        from,
        to,
        is_caller,
    } = request;
    let transform = video_transform.unwrap_or_default();

    let connection = state
        .engine
        .open(SessionDescription::new(sdp_type, sdp))
        .await
        .map_err(|e| {
            warn!("call {} -> {}: could not open session: {}", from, to, e);
            e
        })?;
    let tracks = connection.video_tracks().await;

    let local = match connection.negotiate().await {
        Ok(local) => local,
        Err(e) => {
            warn!("call {} -> {}: negotiation failed: {}", from, to, e);
            connection.close().await;
            return Err(e.into());
        }
    };

    let call = CallSession {
        id: Uuid::new_v4(),
        from: from.clone(),
        to: to.clone(),
        transform,
        is_caller,
        created_at: Instant::now(),
        connection,
    };
    info!(
        "call {} answered: {} -> {} (transform={}, caller={})",
        call.id, from, to, transform, is_caller
    );
    state.calls.insert(call.clone()).await;
    tokio::spawn(run_call(state.clone(), call, tracks));

    if is_caller {
        state.presence.create_connection(&from, &to).await;
    }

    Ok(Json(local))
}

/// Publish the call's inbound video as relay tracks until the connection
/// closes, then withdraw them.
async fn run_call(state: AppState, call: CallSession, mut tracks: Option<InboundTracks>) {
    let mut published = Vec::new();

    loop {
        tokio::select! {
            _ = call.connection.closed() => break,
            source = next_track(&mut tracks) => {
                let relay = VideoRelayTrack::new(
                    call.from.clone(),
                    call.to.clone(),
                    call.transform,
                    source,
                    state.registry.clone(),
                    state.filter.clone(),
                );
                published.push(relay.id());
                state.registry.register(relay.handle()).await;
                if let Err(e) = call.connection.attach_outbound(relay).await {
                    warn!("call {}: could not attach relay track: {}", call.id, e);
                }
            }
        }
    }

    for track_id in published {
        state.registry.remove_if(&call.from, track_id).await;
    }
    // A connection that failed on its own still holds its transport.
    call.connection.close().await;
    state.calls.remove(call.id).await;
}

/// Next inbound track; pends forever once the session stops producing them.
async fn next_track(tracks: &mut Option<InboundTracks>) -> Arc<dyn FrameSource> {
    if let Some(rx) = tracks {
        if let Some(source) = rx.recv().await {
            return source;
        }
    }
    *tracks = None;
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<CallUserRequest, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_optional_fields_default() {
        let request = parse(json!({
            "sdp": "v=0", "type": "offer", "from": "a", "to": "b"
        }))
        .unwrap();
        assert_eq!(request.video_transform, None);
        assert!(!request.is_caller);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_unknown_transform_is_identity() {
        let request = parse(json!({
            "sdp": "v=0", "type": "offer", "from": "a", "to": "b",
            "video_transform": "sepia", "is_caller": true
        }))
        .unwrap();
        assert_eq!(request.video_transform, Some(TransformKind::None));
        assert!(request.is_caller);
    }

    #[test]
    fn test_bad_type_is_rejected() {
        assert!(parse(json!({"sdp": "v=0", "type": "bogus", "from": "a", "to": "b"})).is_err());
    }

    #[test]
    fn test_sdp_bounds() {
        let mut request = parse(json!({
            "sdp": " ", "type": "offer", "from": "a", "to": "b"
        }))
        .unwrap();
        assert!(matches!(request.validate(), Err(ApiError::BadRequest(_))));

        request.sdp = "v".repeat(MAX_SDP_BYTES + 1);
        assert!(matches!(request.validate(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::from(NegotiationError::invalid("x")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(NegotiationError::engine("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
