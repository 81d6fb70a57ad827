//! Session token for the remote solving API.

use std::time::{Duration, Instant};

/// A login session owned by one solver client.
#[derive(Debug, Clone)]
pub struct Session {
    key: String,
    expires_at: Instant,
}

impl Session {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self::issued_at(key, Instant::now(), ttl)
    }

    pub fn issued_at(key: impl Into<String>, issued: Instant, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            expires_at: issued + ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Usable at `now` if it stays valid for at least `margin` more.
    pub fn is_fresh(&self, now: Instant, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refreshes_before_expiry() {
        let issued = Instant::now();
        let session = Session::issued_at("abc", issued, Duration::from_secs(3600));
        let margin = Duration::from_secs(300);

        assert!(session.is_fresh(issued, margin));
        assert!(session.is_fresh(issued + Duration::from_secs(3299), margin));
        // Still valid server-side, but inside the refresh margin.
        assert!(!session.is_fresh(issued + Duration::from_secs(3300), margin));
        assert!(!session.is_fresh(issued + Duration::from_secs(4000), margin));
    }

    #[test]
    fn test_zero_margin() {
        let issued = Instant::now();
        let session = Session::issued_at("abc", issued, Duration::from_secs(10));
        assert!(session.is_fresh(issued + Duration::from_secs(9), Duration::ZERO));
        assert!(!session.is_fresh(issued + Duration::from_secs(10), Duration::ZERO));
        assert_eq!(session.key(), "abc");
    }
}
