//! Builder for configuring PixCache initialization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::Engine;
use crate::cache::{LocalStore, ResourceKey, SqliteStore};
use crate::config::{EngineConfig, StoreConfig};
use crate::coordinator::{CoordinatorConfig, FetchCoordinator};
use crate::error::{PixError, Result};
use crate::mediator::Mediated;
use crate::models::{Illust, UserDetail};
use crate::network::{ApiClient, HttpUpstream, RequestThrottle, Upstream};
use crate::PixCache;
use tracing::info;

/// Builder for configuring PixCache initialization.
///
/// Every collaborator can be injected; anything left unset is created from
/// the [`EngineConfig`].
///
/// # Example
///
/// ```rust,ignore
/// use pixcache_core::{EngineConfig, PixCache};
///
/// let cache = PixCache::builder()
///     .with_config(EngineConfig::load("pixcache.json")?)
///     .with_db_path("/tmp/pixcache.sqlite")
///     .build()?;
/// ```
pub struct PixCacheBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn LocalStore>>,
    db_path: Option<PathBuf>,
    upstream: Option<Arc<dyn Upstream>>,
    throttle: Option<Arc<RequestThrottle>>,
}

impl Default for PixCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PixCacheBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            db_path: None,
            upstream: None,
            throttle: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing store. Takes precedence over [`Self::with_db_path`].
    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Open a SQLite store at `path`.
    ///
    /// Default: `<platform cache dir>/pixcache/pixcache.sqlite`
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Use a custom upstream instead of the HTTP one.
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Share a throttle with other components, or replace the configured one.
    pub fn with_throttle(mut self, throttle: Arc<RequestThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Where the SQLite store goes when no path is given.
    pub fn default_db_path() -> Result<PathBuf> {
        dirs::cache_dir()
            .map(|dir| dir.join(StoreConfig::APP_DIR_NAME).join(StoreConfig::DB_FILE_NAME))
            .ok_or_else(|| PixError::Config {
                message: "No platform cache directory; pass a database path".to_string(),
            })
    }

    fn open_store(&mut self) -> Result<Arc<dyn LocalStore>> {
        if let Some(store) = self.store.take() {
            return Ok(store);
        }
        let path = match self.db_path.take() {
            Some(path) => path,
            None => Self::default_db_path()?,
        };
        info!("Opening cache database at {}", path.display());
        Ok(Arc::new(SqliteStore::new(&path)?))
    }

    fn open_upstream(&mut self) -> Result<Arc<dyn Upstream>> {
        if let Some(upstream) = self.upstream.take() {
            return Ok(upstream);
        }
        let client = ApiClient::with_timeout(&self.config.api_base, self.config.request_timeout())?
            .with_access_token(self.config.access_token.clone());
        Ok(Arc::new(HttpUpstream::new(Arc::new(client))))
    }

    /// Build the PixCache instance.
    pub fn build(mut self) -> Result<PixCache> {
        self.config.validate()?;

        let store = self.open_store()?;
        let upstream = self.open_upstream()?;
        let throttle = self.throttle.take().unwrap_or_else(|| {
            Arc::new(RequestThrottle::new(
                self.config.max_concurrent_requests,
                self.config.requests_per_second,
                self.config.retry_config(),
            ))
        });

        let coordinator_config = CoordinatorConfig {
            default_replay_ttl: Duration::from_secs(self.config.replay_ttl_secs),
            max_replay_ttl: Duration::from_secs(self.config.max_replay_ttl_secs),
            replay_capacity: self.config.replay_capacity,
        };

        let engine = Arc::new(Engine {
            store,
            upstream,
            throttle,
            filter: self.config.filter.clone().into_predicate(),
            config: self.config,
        });

        let illusts = {
            let produce = engine.clone();
            let deadline = engine.clone();
            FetchCoordinator::with_expiry_hook(
                Arc::new(move |key: &ResourceKey| produce.illust_producer(key)),
                Arc::new(move |key: &ResourceKey, item: &Mediated<Illust>| {
                    deadline.replay_deadline(key, item)
                }),
                coordinator_config.clone(),
            )
        };
        let users = {
            let produce = engine.clone();
            let deadline = engine.clone();
            FetchCoordinator::with_expiry_hook(
                Arc::new(move |key: &ResourceKey| produce.user_producer(key)),
                Arc::new(move |key: &ResourceKey, item: &Mediated<UserDetail>| {
                    deadline.replay_deadline(key, item)
                }),
                coordinator_config,
            )
        };

        Ok(PixCache {
            engine,
            illusts,
            users,
        })
    }
}
