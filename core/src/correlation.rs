//! Correlation identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque token tying an asynchronous request to its asynchronous answer.
///
/// Minted fresh for every outbound request from 122 random bits (UUID v4), so
/// collisions are the only deduplication boundary the protocol has. The same
/// value is used as the broker message key and as the suffix of the
/// rendezvous key (see [`response_key`](crate::rendezvous::response_key)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a new, globally unique identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an identifier received on the wire.
    ///
    /// No format is enforced: remote services may use any non-empty token.
    #[must_use]
    pub fn from_wire(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn minted_ids_are_distinct() {
        let ids: HashSet<CorrelationId> = (0..10_000).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = CorrelationId::from_wire("abc-123");
        assert_eq!(serde_json::to_string(&id).ok(), Some("\"abc-123\"".to_string()));
        assert_eq!(id.to_string(), "abc-123");
    }

    proptest! {
        #[test]
        fn wire_form_round_trips(raw in "[a-zA-Z0-9-]{1,64}") {
            let id = CorrelationId::from_wire(raw.clone());
            prop_assert_eq!(id.as_str(), raw.as_str());
        }

        #[test]
        fn any_batch_of_minted_ids_is_pairwise_distinct(count in 1usize..512) {
            let ids: HashSet<CorrelationId> = (0..count).map(|_| CorrelationId::new()).collect();
            prop_assert_eq!(ids.len(), count);
        }
    }
}
