//! Gateway wire frames.
//!
//! Inbound frames are JSON objects with a `type` discriminator and a
//! `channel` name. Anything that is not a recognized control frame is a
//! publish, and the raw frame text travels to subscribers verbatim — the
//! relay never rewrites payloads.

use serde::{Deserialize, Serialize};

/// `type` value for a join request.
pub const SUBSCRIBE: &str = "subscribe";
/// `type` value for an explicit leave.
pub const UNSUBSCRIBE: &str = "unsubscribe";

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A frame received from the client.
///
/// A missing or unrecognized `type` means "publish to `channel`".
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub channel: String,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A control frame sent from the server to the client. Published messages
/// are relayed as raw text and never pass through this type.
#[derive(Debug, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub channel: String,
}

impl ServerFrame {
    /// Ack for a completed join, sent only after the registry (and any bus
    /// subscription the join required) is up to date.
    pub fn subscribed(channel: &str) -> Self {
        Self {
            kind: "subscribed",
            channel: channel.to_string(),
        }
    }

    /// Ack for a completed leave.
    pub fn unsubscribed(channel: &str) -> Self {
        Self {
            kind: "unsubscribed",
            channel: channel.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of two string fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_parses() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","channel":"room1"}"#).unwrap();
        assert_eq!(frame.kind.as_deref(), Some(SUBSCRIBE));
        assert_eq!(frame.channel, "room1");
    }

    #[test]
    fn missing_type_is_publish() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"channel":"room1","body":"hello"}"#).unwrap();
        assert!(frame.kind.is_none());
        assert_eq!(frame.channel, "room1");
    }

    #[test]
    fn unknown_type_is_preserved() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"chat","channel":"room1"}"#).unwrap();
        assert_eq!(frame.kind.as_deref(), Some("chat"));
    }

    #[test]
    fn frame_without_channel_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn ack_frames_serialize() {
        let json = ServerFrame::subscribed("room1").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "subscribed");
        assert_eq!(value["channel"], "room1");

        let json = ServerFrame::unsubscribed("room1").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "unsubscribed");
    }
}
