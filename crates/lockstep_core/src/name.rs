//! Peer identity.
//!
//! Peers are identified by a unique human-chosen name. The name doubles as
//! the deterministic tie-break key when two claims carry equal timestamps,
//! so it carries a total lexicographic order.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Peer name - unique, immutable identity of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerName(String);

impl PeerName {
    /// Create a validated peer name
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidName` if the name is empty or contains
    /// whitespace.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidName {
                reason: "name must not be empty".to_string(),
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidName {
                reason: "name must not contain whitespace".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PeerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_name() {
        let name = PeerName::new("alpha").unwrap();
        assert_eq!(name.as_str(), "alpha");
        assert_eq!(name.to_string(), "alpha");
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = PeerName::new("").unwrap_err();
        assert!(matches!(err, CoreError::InvalidName { .. }));
    }

    #[test]
    fn test_whitespace_name_rejected() {
        assert!(PeerName::new("peer one").is_err());
        assert!(PeerName::new("peer\tone").is_err());
    }

    #[test]
    fn test_name_ordering_is_lexicographic() {
        let a = PeerName::new("alpha").unwrap();
        let b = PeerName::new("beta").unwrap();
        assert!(a < b);
    }
}
