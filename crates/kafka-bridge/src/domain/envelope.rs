//! Wire envelopes exchanged with clients and the broker.
//!
//! The correlation identifier is never part of these bodies; it travels as the
//! broker message key.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Request frame sent by a client and republished to the request topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Caller credential, forwarded untouched to the backend
    #[serde(alias = "auth_token")]
    pub credential: String,
    /// Opaque request content
    pub content: String,
}

impl RequestMessage {
    /// Parse a client frame. Text and binary frames are treated alike.
    pub fn from_frame(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}

/// Outcome carried by a reply envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Reply frame written to the client.
///
/// Broker replies share this shape and are forwarded verbatim; the bridge
/// builds its own only for locally detected errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 timestamp
    pub created_at: String,
}

impl ReplyEnvelope {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            content: Some(content.into()),
            error: None,
            created_at: now_rfc3339(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            content: None,
            error: Some(error.into()),
            created_at: now_rfc3339(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Serialize to the JSON text written on the socket
    pub fn to_json(&self) -> String {
        // A struct of strings and a unit enum cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}
