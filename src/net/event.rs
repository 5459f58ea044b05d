//! Push-stream events.
//!
//! DESIGN
//! ======
//! The server sends JSON objects discriminated by `type`. They decode into a
//! closed tagged union with an explicit `Unknown` arm so server-added kinds
//! pass through as no-ops instead of decode failures. Connection lifecycle
//! events are synthesized locally by the stream manager and share the same
//! union so observers handle one type.

#[cfg(test)]
#[path = "event_test.rs"]
mod event_test;

use serde::{Deserialize, Serialize};

use super::types::{AgentRecord, ConnectionRecord};
use crate::error::ErrorCode;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    /// Payload was not a JSON object carrying a string `type`.
    #[error("event missing type discriminator")]
    MissingType,

    /// Payload had a known `type` but its body did not match.
    #[error("malformed {kind} event: {message}")]
    Malformed { kind: String, message: String },

    /// Payload was not valid JSON at all.
    #[error("event is not valid JSON: {0}")]
    InvalidJson(String),
}

impl ErrorCode for EventDecodeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingType => "E_PROTOCOL_TYPE",
            Self::Malformed { .. } => "E_PROTOCOL",
            Self::InvalidJson(_) => "E_PROTOCOL_JSON",
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Full snapshot; sent on every (re)connect.
    InitialState {
        #[serde(default)]
        agents: Vec<AgentRecord>,
        #[serde(default)]
        connections: Vec<ConnectionRecord>,
    },
    /// Agent created or changed.
    AgentUpdated { agent: AgentRecord },
    AgentDeleted {
        agent_id: String,
        #[serde(default)]
        connections_removed: Vec<String>,
    },
    ConnectionAdded { connection: ConnectionRecord },
    ConnectionRemoved { connection_id: String },

    // Synthesized locally by the stream manager.
    ConnectionEstablished,
    ConnectionError {
        #[serde(default)]
        error: Option<String>,
    },
    ConnectionFailed {
        #[serde(default)]
        error: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl SyncEvent {
    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an [`EventDecodeError`] when the payload is not JSON, lacks a
    /// `type`, or carries a known `type` with a mismatched body.
    pub fn decode(raw: &str) -> Result<Self, EventDecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| EventDecodeError::InvalidJson(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(EventDecodeError::MissingType)?
            .to_owned();

        serde_json::from_value(value).map_err(|e| EventDecodeError::Malformed { kind, message: e.to_string() })
    }

    /// Wire name of this event, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::AgentUpdated { .. } => "agent_updated",
            Self::AgentDeleted { .. } => "agent_deleted",
            Self::ConnectionAdded { .. } => "connection_added",
            Self::ConnectionRemoved { .. } => "connection_removed",
            Self::ConnectionEstablished => "connection_established",
            Self::ConnectionError { .. } => "connection_error",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::Unknown => "unknown",
        }
    }
}
