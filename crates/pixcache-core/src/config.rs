//! Configuration for pixcache.
//!
//! Constant tables hold fixed defaults; [`EngineConfig`] is the tunable,
//! file-loadable part.

use crate::cache::ResourceKind;
use crate::error::{PixError, Result};
use crate::mediator::RevalidationPolicy;
use crate::network::{FetchLimit, IllustFilter, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const API_BASE: &'static str = "https://app-api.pixiv.net";
    pub const USER_AGENT: &'static str = "PixivAndroidApp/5.0.234 (Android 11; Pixel 5)";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const THROTTLE_DELAY: Duration = Duration::from_millis(500);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
    pub const MAX_CONCURRENT_REQUESTS: usize = 4;
    pub const REQUESTS_PER_SECOND: u32 = 2;
}

/// Local store configuration.
pub struct StoreConfig;

impl StoreConfig {
    pub const DB_FILE_NAME: &'static str = "pixcache.sqlite";
    pub const APP_DIR_NAME: &'static str = "pixcache";
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    /// Records older than this are dropped by `purge_expired`.
    pub const RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);
}

/// Fetch-sharing coordinator defaults.
pub struct CoordinatorDefaults;

impl CoordinatorDefaults {
    pub const REPLAY_TTL: Duration = Duration::from_secs(60);
    pub const MAX_REPLAY_TTL: Duration = Duration::from_secs(3600);
    pub const REPLAY_CAPACITY: u64 = 256;
}

/// Max age per resource kind, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxAgeConfig {
    pub illust_secs: u64,
    pub user_secs: u64,
    pub search_secs: u64,
    pub user_illusts_secs: u64,
    pub ranking_secs: u64,
}

impl Default for MaxAgeConfig {
    fn default() -> Self {
        Self {
            illust_secs: 7 * 24 * 3600,
            user_secs: 24 * 3600,
            search_secs: 3600,
            user_illusts_secs: 6 * 3600,
            ranking_secs: 12 * 3600,
        }
    }
}

impl MaxAgeConfig {
    pub fn for_kind(&self, kind: ResourceKind) -> Duration {
        Duration::from_secs(match kind {
            ResourceKind::Illust => self.illust_secs,
            ResourceKind::UserDetail => self.user_secs,
            ResourceKind::Search => self.search_secs,
            ResourceKind::UserIllusts => self.user_illusts_secs,
            ResourceKind::Ranking => self.ranking_secs,
        })
    }
}

/// Page caps for a single collection fetch. `None` means no cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLimits {
    pub search_pages: Option<u32>,
    pub user_illusts_pages: Option<u32>,
    pub ranking_pages: Option<u32>,
    /// Item cap applied to every collection fetch.
    pub max_items: Option<usize>,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            search_pages: Some(10),
            user_illusts_pages: Some(30),
            ranking_pages: Some(17),
            max_items: None,
        }
    }
}

impl PageLimits {
    pub fn for_kind(&self, kind: ResourceKind) -> FetchLimit {
        let max_pages = match kind {
            ResourceKind::Search => self.search_pages,
            ResourceKind::UserIllusts => self.user_illusts_pages,
            ResourceKind::Ranking => self.ranking_pages,
            ResourceKind::Illust | ResourceKind::UserDetail => Some(1),
        };
        FetchLimit {
            max_pages,
            max_items: self.max_items,
        }
    }
}

/// Tunable engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub api_base: String,
    /// Bearer token for the upstream API.
    pub access_token: Option<String>,
    pub max_age: MaxAgeConfig,
    pub page_limits: PageLimits,
    pub revalidation: RevalidationPolicy,
    pub filter: IllustFilter,
    pub replay_ttl_secs: u64,
    pub max_replay_ttl_secs: u64,
    pub replay_capacity: u64,
    pub max_concurrent_requests: usize,
    /// 0 disables the quota.
    pub requests_per_second: u32,
    pub retry_attempts: u32,
    pub request_timeout_secs: u64,
    pub retention_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: NetworkConfig::API_BASE.to_string(),
            access_token: None,
            max_age: MaxAgeConfig::default(),
            page_limits: PageLimits::default(),
            revalidation: RevalidationPolicy::default(),
            filter: IllustFilter::default(),
            replay_ttl_secs: CoordinatorDefaults::REPLAY_TTL.as_secs(),
            max_replay_ttl_secs: CoordinatorDefaults::MAX_REPLAY_TTL.as_secs(),
            replay_capacity: CoordinatorDefaults::REPLAY_CAPACITY,
            max_concurrent_requests: NetworkConfig::MAX_CONCURRENT_REQUESTS,
            requests_per_second: NetworkConfig::REQUESTS_PER_SECOND,
            retry_attempts: NetworkConfig::MAX_RETRIES,
            request_timeout_secs: NetworkConfig::REQUEST_TIMEOUT.as_secs(),
            retention_secs: StoreConfig::RETENTION.as_secs(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| PixError::io_with_path(e, path))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| PixError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(PixError::Validation {
                field: "max_concurrent_requests".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.retry_attempts == 0 {
            return Err(PixError::Validation {
                field: "retry_attempts".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.revalidation.verify_pages == 0 {
            return Err(PixError::Validation {
                field: "revalidation.verify_pages".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.replay_ttl_secs > self.max_replay_ttl_secs {
            return Err(PixError::Validation {
                field: "replay_ttl_secs".into(),
                message: format!(
                    "{} exceeds max_replay_ttl_secs ({})",
                    self.replay_ttl_secs, self.max_replay_ttl_secs
                ),
            });
        }
        Ok(())
    }

    pub fn max_age(&self, kind: ResourceKind) -> Duration {
        self.max_age.for_kind(kind)
    }

    pub fn fetch_limit(&self, kind: ResourceKind) -> FetchLimit {
        self.page_limits.for_kind(kind)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.retry_attempts)
            .with_base_delay(NetworkConfig::RETRY_BASE_DELAY)
            .with_max_delay(NetworkConfig::RETRY_MAX_DELAY)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_age(ResourceKind::Search), Duration::from_secs(3600));
        assert_eq!(config.fetch_limit(ResourceKind::Search).max_pages, Some(10));
        assert_eq!(config.revalidation.verify_pages, 1);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_age": {{"search_secs": 60}}, "requests_per_second": 0,
                "revalidation": {{"rebuild_on_drift": true}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_age(ResourceKind::Search), Duration::from_secs(60));
        assert_eq!(config.max_age.ranking_secs, MaxAgeConfig::default().ranking_secs);
        assert_eq!(config.requests_per_second, 0);
        assert!(config.revalidation.rebuild_on_drift);
        assert_eq!(config.revalidation.verify_pages, 1);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_concurrent_requests": 0}}"#).unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(PixError::Validation { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(PixError::Config { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/pixcache.json"),
            Err(PixError::Io { .. })
        ));
    }
}
