// WebSocket message types for the tally-session.v1 protocol.

use serde::{Deserialize, Serialize};

use crate::types::ConnectionRecord;

/// All message types in the tally-session.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Server -> Client: sent once after connect, echoing the id the
    /// server assigned to this connection.
    Welcome { connection_id: String },

    /// Client -> Server: set the shared value. The server applies it to
    /// every registered connection and fans the new snapshot out.
    Update { value: serde_json::Value },

    /// Server -> Client: full membership snapshot, addressed per target.
    Snapshot {
        connection_id: String,
        connections: Vec<ConnectionRecord>,
    },

    /// Server -> Client: non-fatal error.
    Error { code: String, message: String },
}

pub fn decode_message(raw: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str::<WsMessage>(raw)
}

pub fn encode_message(message: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_shapes_match_wire_contract() {
        let samples = [
            (
                WsMessage::Welcome { connection_id: "conn-a".into() },
                "welcome",
                &["type", "connection_id"][..],
            ),
            (
                WsMessage::Update { value: json!({ "points": 8 }) },
                "update",
                &["type", "value"][..],
            ),
            (
                WsMessage::Snapshot {
                    connection_id: "conn-a".into(),
                    connections: vec![ConnectionRecord::new("conn-a")],
                },
                "snapshot",
                &["type", "connection_id", "connections"][..],
            ),
            (
                WsMessage::Error { code: "INTERNAL_ERROR".into(), message: "store failed".into() },
                "error",
                &["type", "code", "message"][..],
            ),
        ];

        for (message, expected_type, expected_keys) in samples {
            let value = serde_json::to_value(message).expect("ws message should serialize");
            assert_eq!(value["type"], expected_type);
            for key in expected_keys {
                assert!(
                    value.get(key).is_some(),
                    "serialized `{expected_type}` frame must include `{key}`",
                );
            }
        }
    }

    #[test]
    fn decode_rejects_unknown_frame_type() {
        assert!(decode_message(r#"{"type":"ping"}"#).is_err());
        assert!(decode_message("not json").is_err());
    }

    #[test]
    fn update_roundtrips_opaque_value() {
        let message = WsMessage::Update { value: json!([1, "a", { "nested": true }]) };
        let encoded = encode_message(&message).unwrap();
        assert_eq!(decode_message(&encoded).unwrap(), message);
    }

    #[test]
    fn snapshot_preserves_absent_values() {
        let message = WsMessage::Snapshot {
            connection_id: "conn-b".into(),
            connections: vec![
                ConnectionRecord::new("conn-a"),
                ConnectionRecord {
                    connection_id: "conn-b".into(),
                    value: Some(json!({ "points": 3 })),
                },
            ],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value["connections"][0].get("value").is_none());
        assert_eq!(value["connections"][1]["value"]["points"], 3);
    }
}
