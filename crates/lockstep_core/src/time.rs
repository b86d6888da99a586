//! Wall-clock timestamps.
//!
//! Used only for liveness bookkeeping (last-seen times); protocol ordering
//! runs on logical clocks.

use serde::{Deserialize, Serialize};

/// Wall-clock timestamp in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create from raw milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Raw milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since an earlier timestamp, saturating at zero
    #[must_use]
    pub const fn elapsed_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_since() {
        let earlier = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(3_500);
        assert_eq!(later.elapsed_since(earlier), 2_500);
    }

    #[test]
    fn test_elapsed_saturates() {
        let earlier = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(3_500);
        assert_eq!(earlier.elapsed_since(later), 0);
    }

    #[test]
    fn test_now_is_nonzero() {
        assert!(Timestamp::now().as_millis() > 0);
    }
}
