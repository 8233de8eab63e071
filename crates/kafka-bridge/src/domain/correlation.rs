//! Correlation and connection identifiers.
//!
//! Both are UUID v7: time-ordered, so log lines and broker keys sort by
//! creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key that ties a published request to its broker reply.
///
/// Minted fresh for every request and never reused. Travels as the Kafka
/// message key in its hyphenated string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from the string form used as the broker key
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Parse from raw broker key bytes.
    ///
    /// Returns `None` for non-UTF-8 keys or keys that are not UUIDs.
    pub fn from_key(key: &[u8]) -> Option<Self> {
        std::str::from_utf8(key).ok().and_then(|s| Self::parse(s).ok())
    }

    /// Key string published alongside the request
    pub fn to_key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_correlation_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_key_round_trip() {
        let id = CorrelationId::new();
        let key = id.to_key();
        assert_eq!(key.len(), 36); // 8-4-4-4-12
        assert_eq!(CorrelationId::from_key(key.as_bytes()), Some(id));
    }

    #[test]
    fn test_from_key_rejects_garbage() {
        assert_eq!(CorrelationId::from_key(b"not-a-uuid"), None);
        assert_eq!(CorrelationId::from_key(&[0xff, 0xfe, 0x00]), None);
        assert_eq!(CorrelationId::from_key(b""), None);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string().len(), 36);
        assert_ne!(id, ConnectionId::new());
    }
}
