// Core domain types shared across all Tally crates.

use serde::{Deserialize, Serialize};

/// One live client session in the estimation session.
///
/// The record exists in the connection store exactly as long as the
/// connection is considered live; there is no separate liveness flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    /// Opaque unique identifier assigned by the server at connect time.
    pub connection_id: String,
    /// Last value submitted by this connection (vote, estimate, ...).
    /// Never interpreted by the server, only stored and echoed back.
    /// `None` until the first update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ConnectionRecord {
    /// A freshly registered connection with no value yet.
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self { connection_id: connection_id.into(), value: None }
    }
}
