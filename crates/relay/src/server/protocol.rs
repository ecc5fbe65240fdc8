//! Relay Wire Protocol
//!
//! Defines the frames exchanged between clients and the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::{PayloadMode, SenderTag};
use crate::error::{RelayError, Result};
use crate::registry::ConnectionId;

/// Structured chat frame, used in both directions in structured mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Identifier the client chose for itself
    pub client_id: String,
    pub message: String,
}

/// A frame received from a client, parsed according to the payload mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Chat(ChatMessage),
}

impl Inbound {
    /// Parse one text frame.
    ///
    /// Text mode accepts anything. Structured mode requires a JSON object with
    /// string `clientId` and `message` fields; other fields are ignored.
    pub fn parse(mode: PayloadMode, text: &str) -> Result<Self> {
        match mode {
            PayloadMode::Text => Ok(Self::Text(text.to_string())),
            PayloadMode::Structured => serde_json::from_str(text)
                .map(Self::Chat)
                .map_err(|e| RelayError::MalformedPayload(e.to_string())),
        }
    }
}

/// A message queued for delivery to one or more connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Sent as-is in a text frame
    Text(String),
    /// Sent as a JSON text frame
    Chat(ChatMessage),
}

impl RelayMessage {
    /// Build the outbound message for an inbound frame from `sender`
    pub fn tagged(sender: ConnectionId, inbound: Inbound, tag: SenderTag) -> Self {
        match inbound {
            Inbound::Text(text) => Self::Text(format!("{}: {}", sender, text)),
            Inbound::Chat(chat) => match tag {
                SenderTag::Client => Self::Chat(chat),
                SenderTag::Server => Self::Chat(ChatMessage {
                    client_id: sender.to_string(),
                    message: chat.message,
                }),
            },
        }
    }

    /// Encode as the text of a WebSocket frame
    pub fn to_frame(&self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Chat(chat) => {
                serde_json::to_string(chat).map_err(|e| RelayError::Transport(e.to_string()))
            }
        }
    }
}

/// Public view of a registered connection
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_mode_accepts_anything() {
        let inbound = Inbound::parse(PayloadMode::Text, "{not json").unwrap();
        assert_eq!(inbound, Inbound::Text("{not json".to_string()));
    }

    #[test]
    fn test_text_is_tagged_with_sender() {
        let sender = ConnectionId::new();
        let msg = RelayMessage::tagged(sender, Inbound::Text("hello".into()), SenderTag::Client);
        assert_eq!(msg.to_frame().unwrap(), format!("{}: hello", sender));
    }

    #[test]
    fn test_structured_parse() {
        let inbound =
            Inbound::parse(PayloadMode::Structured, r#"{"clientId":"x","message":"hi"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Chat(ChatMessage {
                client_id: "x".to_string(),
                message: "hi".to_string(),
            })
        );
    }

    #[test]
    fn test_structured_ignores_extra_fields() {
        let inbound = Inbound::parse(
            PayloadMode::Structured,
            r#"{"clientId":"x","message":"hi","room":"lobby"}"#,
        );
        assert!(matches!(inbound, Ok(Inbound::Chat(_))));
    }

    #[test]
    fn test_structured_rejects_bad_frames() {
        for frame in [
            "hello",
            r#"{"clientId":"x"}"#,
            r#"{"message":"hi"}"#,
            r#"{"clientId":1,"message":"hi"}"#,
            r#"["x","hi"]"#,
        ] {
            let result = Inbound::parse(PayloadMode::Structured, frame);
            assert!(
                matches!(result, Err(RelayError::MalformedPayload(_))),
                "accepted {}",
                frame
            );
        }
    }

    #[test]
    fn test_structured_relayed_verbatim_with_client_tag() {
        let chat = ChatMessage {
            client_id: "x".to_string(),
            message: "hi".to_string(),
        };
        let msg = RelayMessage::tagged(ConnectionId::new(), Inbound::Chat(chat), SenderTag::Client);
        let json: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"clientId": "x", "message": "hi"}));
    }

    #[test]
    fn test_structured_server_tag_overrides_client_id() {
        let sender = ConnectionId::new();
        let chat = ChatMessage {
            client_id: "spoofed".to_string(),
            message: "hi".to_string(),
        };
        let msg = RelayMessage::tagged(sender, Inbound::Chat(chat), SenderTag::Server);
        match msg {
            RelayMessage::Chat(chat) => {
                assert_eq!(chat.client_id, sender.to_string());
                assert_eq!(chat.message, "hi");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
