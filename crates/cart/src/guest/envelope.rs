//! TTL envelope around persisted values.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Default lifetime of a guest record.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// A persisted value with its write and expiry instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRecord<T> {
    pub data: T,
    pub written_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> GuestRecord<T> {
    /// Wrap `data` written at `now`, expiring after `ttl`.
    #[must_use]
    pub fn new(data: T, now: DateTime<Utc>, ttl: TimeDelta) -> Self {
        Self {
            data,
            written_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the record is no longer valid at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
