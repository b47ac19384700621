//! Pixcache Core - cache mediation and fetch coalescing for a paginated
//! illustration API.
//!
//! Reads go through three layers:
//!
//! - a [`coordinator::FetchCoordinator`] that lets concurrent callers for the
//!   same resource share one in-flight fetch and briefly replays its result,
//! - a mediator ([`mediator`]) that decides from cached metadata whether to
//!   serve the local copy, resume a partial collection, revalidate or rebuild,
//! - the local store ([`cache`]) and the throttled upstream ([`network`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::TryStreamExt;
//! use pixcache_core::{Mediated, PixCache, SearchParams};
//!
//! #[tokio::main]
//! async fn main() -> pixcache_core::Result<()> {
//!     let cache = PixCache::builder().with_db_path("/tmp/pixcache.sqlite").build()?;
//!
//!     let (meta, illust) = cache.illust(59580629, false).await?;
//!     println!("{} (cached at {})", illust.title, meta.updated_at);
//!
//!     let mut results = cache.search(SearchParams::new("landscape"), false).await?;
//!     while let Some(element) = results.try_next().await? {
//!         if let Mediated::Item(illust) = element {
//!             println!("{}", illust.id);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mediator;
pub mod models;
pub mod network;

mod api;

// Re-export commonly used types
pub use cache::{
    CacheMetadata, CacheMiss, Cacheable, Cursor, LocalStore, Lookup, MemoryStore, ResourceKey,
    ResourceKind, SqliteStore,
};
pub use config::{EngineConfig, MaxAgeConfig, PageLimits};
pub use coordinator::{CoordinatorConfig, CoordinatorStats, FetchCoordinator};
pub use error::{PixError, Result};
pub use mediator::{collect_mediated, Mediated, MediatedStream, RevalidationPolicy};
pub use models::{
    Illust, IllustKind, RankingMode, SearchParams, SearchSort, SearchTarget, UserDetail,
};
pub use network::{FetchLimit, IllustFilter, Page, PageFetcher, RequestThrottle, Upstream};

// Re-export builder from api module
pub use api::{PixCacheBuilder, PixCacheStats};

use std::sync::Arc;

use api::Engine;

/// Main entry point: cached, coalesced access to the upstream resources.
///
/// Single resources (one illustration, one user) resolve to a value plus the
/// metadata of the copy served. Listings (search, a user's posts, rankings)
/// resolve to a lazy [`MediatedStream`] of items interleaved with metadata
/// records; drop it to stop reading.
///
/// Cloning is cheap and clones share the store, throttle and in-flight
/// fetches.
#[derive(Clone)]
pub struct PixCache {
    engine: Arc<Engine>,
    illusts: FetchCoordinator<ResourceKey, Mediated<Illust>>,
    users: FetchCoordinator<ResourceKey, Mediated<UserDetail>>,
}

impl PixCache {
    /// Create a builder for PixCache.
    pub fn builder() -> PixCacheBuilder {
        PixCacheBuilder::new()
    }

    /// Build with default configuration and an explicit database path.
    pub fn open(db_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        PixCacheBuilder::new().with_db_path(db_path).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// The local store behind this cache.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.engine.store
    }

    /// The throttle every upstream call goes through.
    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.engine.throttle
    }
}
