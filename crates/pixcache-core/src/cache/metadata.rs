//! Freshness and resumability metadata for cached records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque upstream continuation token.
///
/// For the HTTP fetcher this is the next-page URL handed out by the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata stored alongside every cached record.
///
/// A collection whose `continuation_cursor` is `None` is complete; otherwise
/// the stored items are a prefix and the cursor says where to resume.
/// Values are never mutated once handed out; the `with_*` methods return
/// updated copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub continuation_cursor: Option<Cursor>,
}

impl CacheMetadata {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            page_count: None,
            continuation_cursor: None,
        }
    }

    /// Metadata stamped with the current time.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn with_updated_at(&self, updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            ..self.clone()
        }
    }

    pub fn with_page_count(&self, page_count: Option<u32>) -> Self {
        Self {
            page_count,
            ..self.clone()
        }
    }

    pub fn with_cursor(&self, continuation_cursor: Option<Cursor>) -> Self {
        Self {
            continuation_cursor,
            ..self.clone()
        }
    }

    /// Whether the cached collection holds every upstream item.
    pub fn is_complete(&self) -> bool {
        self.continuation_cursor.is_none()
    }

    /// Age of the record at `now`. Negative ages (clock skew) clamp to zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Instant at which the record turns stale for `max_age`.
    pub fn expires_at(&self, max_age: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| self.updated_at.checked_add_signed(age))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Fail with [`CacheMiss::Expired`] once the record is `max_age` old or older.
    pub fn check_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> Lookup<()> {
        if self.age(now) >= max_age {
            Err(CacheMiss::Expired(self.clone()))
        } else {
            Ok(())
        }
    }
}

/// Expected, recoverable reasons a cache lookup produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    /// No record exists.
    Missing,
    /// A record exists but is stale; carries its metadata.
    Expired(CacheMetadata),
}

impl std::fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMiss::Missing => write!(f, "missing"),
            CacheMiss::Expired(meta) => write!(f, "expired (updated {})", meta.updated_at),
        }
    }
}

/// Outcome of a freshness-checked lookup.
pub type Lookup<T> = std::result::Result<T, CacheMiss>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_fresh_before_max_age() {
        let meta = CacheMetadata::new(at(0));
        assert!(meta.check_fresh(Duration::from_secs(60), at(59)).is_ok());
    }

    #[test]
    fn test_expired_at_exact_max_age() {
        let meta = CacheMetadata::new(at(0));
        let result = meta.check_fresh(Duration::from_secs(60), at(60));
        assert_eq!(result, Err(CacheMiss::Expired(meta)));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let meta = CacheMetadata::new(at(100));
        assert_eq!(meta.age(at(0)), Duration::ZERO);
        assert!(meta.check_fresh(Duration::from_secs(1), at(0)).is_ok());
    }

    #[test]
    fn test_copy_on_update() {
        let meta = CacheMetadata::new(at(0)).with_page_count(Some(3));
        let resumed = meta.with_cursor(Some(Cursor::new("next")));
        assert!(meta.is_complete());
        assert!(!resumed.is_complete());
        assert_eq!(resumed.page_count, Some(3));
    }

    #[test]
    fn test_expires_at() {
        let meta = CacheMetadata::new(at(0));
        assert_eq!(meta.expires_at(Duration::from_secs(60)), at(60));
        assert_eq!(
            meta.expires_at(Duration::MAX),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
