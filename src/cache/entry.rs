//! Decision cache entry shape (spec §3/§4.7).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::expr::Value;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub message: String,
    pub headers: HashMap<String, String>,
}

/// Deep-copied on both store and retrieval (spec §4.7, tested by §8's
/// no-aliasing property): callers never mutate the cache's backing memory
/// and the cache never observes a caller's post-store mutation.
#[derive(Debug, Clone)]
pub struct DecisionCacheEntry {
    pub decision: String,
    pub response: CachedResponse,
    pub variables: HashMap<String, Value>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DecisionCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn entry_is_expired_after_expires_at() {
        let now = Utc::now();
        let entry = DecisionCacheEntry {
            decision: "pass".into(),
            response: CachedResponse {
                status: 200,
                message: String::new(),
                headers: HashMap::new(),
            },
            variables: HashMap::new(),
            stored_at: now - Duration::seconds(120),
            expires_at: now - Duration::seconds(60),
        };
        assert!(entry.is_expired(now));
    }

    #[test]
    fn entry_not_expired_before_expires_at() {
        let now = Utc::now();
        let entry = DecisionCacheEntry {
            decision: "pass".into(),
            response: CachedResponse {
                status: 200,
                message: String::new(),
                headers: HashMap::new(),
            },
            variables: HashMap::new(),
            stored_at: now,
            expires_at: now + Duration::seconds(60),
        };
        assert!(!entry.is_expired(now));
    }
}
