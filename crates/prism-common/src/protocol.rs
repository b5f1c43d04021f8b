use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Identifier of one connected signaling client (one per browser tab/socket).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Issue a fresh random identifier for a newly accepted socket.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Events a browser client sends over its signaling socket.
///
/// Connect and disconnect are implied by the socket lifecycle and have no
/// frame of their own.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Ask `to` to accept a call; `offer` is forwarded untouched.
    CallUser { offer: Value, to: ClientId },

    /// Answer a call previously offered by `to`.
    MakeAnswer { answer: Value, to: ClientId },

    /// Decline a call; `from` names the original caller.
    RejectCall { from: ClientId },
}

impl ClientEvent {
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of the event, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::CallUser { .. } => "call-user",
            ClientEvent::MakeAnswer { .. } => "make-answer",
            ClientEvent::RejectCall { .. } => "reject-call",
        }
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First frame on every socket: the id the server assigned to it.
    Welcome {
        #[serde(rename = "socketId")]
        socket_id: ClientId,
    },

    UpdateUserList { users: Vec<ClientId> },

    RemoveUser {
        #[serde(rename = "socketId")]
        socket_id: ClientId,
    },

    CallMade { offer: Value, socket: ClientId },

    AnswerMade { socket: ClientId, answer: Value },

    CallRejected { socket: ClientId },

    /// A server-side media session now exists for `from`; the receiver
    /// should negotiate its own leg back.
    CreateConnection { from: ClientId },

    /// The client's last frame was rejected.
    Error { message: String },
}

impl ServerEvent {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the event, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome { .. } => "welcome",
            ServerEvent::UpdateUserList { .. } => "update-user-list",
            ServerEvent::RemoveUser { .. } => "remove-user",
            ServerEvent::CallMade { .. } => "call-made",
            ServerEvent::AnswerMade { .. } => "answer-made",
            ServerEvent::CallRejected { .. } => "call-rejected",
            ServerEvent::CreateConnection { .. } => "create-connection",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Kind of a session description, as carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// An SDP blob plus its kind; also the body of a successful call setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_format() {
        let text = r#"{"event":"call-user","data":{"offer":{"type":"offer","sdp":"v=0"},"to":"b2"}}"#;
        let event = ClientEvent::from_text(text).unwrap();
        assert_eq!(
            event,
            ClientEvent::CallUser {
                offer: json!({"type": "offer", "sdp": "v=0"}),
                to: ClientId::from("b2"),
            }
        );

        let reject = ClientEvent::from_text(r#"{"event":"reject-call","data":{"from":"a1"}}"#).unwrap();
        assert_eq!(
            reject,
            ClientEvent::RejectCall {
                from: ClientId::from("a1")
            }
        );
    }

    #[test]
    fn test_client_event_name_matches_wire_tag() {
        let events = [
            ClientEvent::CallUser {
                offer: json!(null),
                to: ClientId::from("b"),
            },
            ClientEvent::MakeAnswer {
                answer: json!(null),
                to: ClientId::from("a"),
            },
            ClientEvent::RejectCall {
                from: ClientId::from("a"),
            },
        ];
        for event in events {
            let wire = serde_json::to_value(&event).unwrap();
            assert_eq!(wire["event"], event.name());
        }
    }

    #[test]
    fn test_unknown_client_event_is_protocol_error() {
        let err = ClientEvent::from_text(r#"{"event":"join-room","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = ClientEvent::from_text("not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_server_event_field_names() {
        let removed = ServerEvent::RemoveUser {
            socket_id: ClientId::from("a1"),
        };
        let value: Value = serde_json::from_str(&removed.to_text().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "remove-user", "data": {"socketId": "a1"}}));

        let answer = ServerEvent::AnswerMade {
            socket: ClientId::from("b2"),
            answer: json!({"sdp": "x"}),
        };
        let value: Value = serde_json::from_str(&answer.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "answer-made");
        assert_eq!(value["data"]["socket"], "b2");
        assert_eq!(answer.name(), "answer-made");
    }

    #[test]
    fn test_session_description_uses_type_field() {
        let desc: SessionDescription =
            serde_json::from_value(json!({"sdp": "v=0", "type": "offer"})).unwrap();
        assert_eq!(desc.sdp_type, SdpType::Offer);
        assert!(serde_json::from_value::<SessionDescription>(json!({"sdp": "v=0", "type": "bogus"})).is_err());
    }

    #[test]
    fn test_generated_client_ids_are_distinct() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }
}
