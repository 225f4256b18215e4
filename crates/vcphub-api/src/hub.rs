//! Shared WebSocket channel base.
//!
//! Every channel speaks the same envelope: UTF-8 JSON frames with a
//! top-level `type` and the payload under `data`. Connections embed a
//! shared key in the final path segment (`VCP_Key=<key>`); mismatches
//! are refused at upgrade time.

use serde::{Deserialize, Serialize};

use vcphub_types::{VcpError, VcpResult};

/// Prefix of the key-bearing path segment.
const KEY_SEGMENT_PREFIX: &str = "VCP_Key=";

/// One wire frame: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    #[must_use]
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Serialize to wire text.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

/// Extract the shared key from a `VCP_Key=<key>` path segment.
#[must_use]
pub fn extract_key(segment: &str) -> Option<&str> {
    segment
        .strip_prefix(KEY_SEGMENT_PREFIX)
        .filter(|k| !k.is_empty())
}

/// Check a path segment against the configured shared key.
///
/// # Errors
///
/// `websocket-auth-failed` for a malformed segment or a key mismatch.
pub fn authorize(segment: &str, expected: &str) -> VcpResult<()> {
    let Some(key) = extract_key(segment) else {
        return Err(VcpError::WebSocketAuthFailed(
            "path segment does not carry a VCP_Key".into(),
        ));
    };
    if key != expected {
        return Err(VcpError::WebSocketAuthFailed("shared key mismatch".into()));
    }
    Ok(())
}

/// The greeting frame every channel sends right after upgrade.
#[must_use]
pub fn connection_ack(server_id: &str) -> Frame {
    Frame::new(
        "connection_ack",
        serde_json::json!({
            "serverId": server_id,
            "message": "connection established",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrips_with_type_field() {
        let f = Frame::new("heartbeat", serde_json::json!({}));
        let text = f.to_text();
        assert!(text.contains("\"type\":\"heartbeat\""));
        let back: Frame = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind, "heartbeat");
    }

    #[test]
    fn frame_tolerates_missing_data() {
        let back: Frame = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(back.kind, "heartbeat");
        assert!(back.data.is_null());
    }

    #[test]
    fn extract_key_requires_prefix_and_value() {
        assert_eq!(extract_key("VCP_Key=abc"), Some("abc"));
        assert_eq!(extract_key("VCP_Key="), None);
        assert_eq!(extract_key("abc"), None);
    }

    #[test]
    fn authorize_accepts_matching_key() {
        assert!(authorize("VCP_Key=s3cret", "s3cret").is_ok());
    }

    #[test]
    fn authorize_rejects_mismatch_and_malformed() {
        assert_eq!(
            authorize("VCP_Key=wrong", "s3cret").unwrap_err().kind(),
            "websocket-auth-failed"
        );
        assert_eq!(
            authorize("nonsense", "s3cret").unwrap_err().kind(),
            "websocket-auth-failed"
        );
    }

    #[test]
    fn ack_carries_server_id() {
        let ack = connection_ack("hub-1");
        assert_eq!(ack.kind, "connection_ack");
        assert_eq!(ack.data["serverId"], "hub-1");
    }
}
