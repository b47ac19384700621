//! Incremental-append collection mediation.
//!
//! For collections that grow over time and shift between crawls (a user's
//! works, search results). Missing and fresh caches behave as in
//! [`super::mediate_many`]. An expired prefix is not resumed blindly: the
//! head of the listing is fetched again and upserted as a verification
//! write, which refreshes the record while keeping its stored cursor, and
//! the refreshed cache is then served and resumed as usual.

use super::collection::{fetch_items, from_cache, rebuild};
use super::source::CollectionSource;
use super::MediatedStream;
use crate::cache::{CacheMetadata, CacheMiss};
use crate::error::{PixError, Result};
use crate::network::FetchLimit;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How an expired, partially cached collection is revalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevalidationPolicy {
    /// Head pages fetched for the verification write.
    pub verify_pages: u32,
    /// Rebuild when none of the head items were already cached.
    pub rebuild_on_drift: bool,
    /// Skip verification and rebuild once the record is this old.
    pub rebuild_after_secs: Option<u64>,
}

impl Default for RevalidationPolicy {
    fn default() -> Self {
        Self {
            verify_pages: 1,
            rebuild_on_drift: false,
            rebuild_after_secs: None,
        }
    }
}

impl RevalidationPolicy {
    pub fn rebuild_after(&self) -> Option<Duration> {
        self.rebuild_after_secs.map(Duration::from_secs)
    }

    /// Whether `stale` is too old to be worth verifying.
    pub fn too_old(&self, stale: &CacheMetadata, now: DateTime<Utc>) -> bool {
        self.rebuild_after()
            .is_some_and(|limit| stale.age(now) >= limit)
    }
}

/// Mediate a collection with incremental-append semantics.
pub fn mediate_append<T, S>(
    source: Arc<S>,
    limit: FetchLimit,
    policy: RevalidationPolicy,
) -> MediatedStream<T>
where
    T: Clone + Send + 'static,
    S: CollectionSource<T> + ?Sized + 'static,
{
    stream::once(async move {
        let stream = match source.read_local().await? {
            Ok(cached) => from_cache(source, cached, limit),
            Err(CacheMiss::Missing) => {
                debug!("append: cache missing, rebuilding");
                rebuild(source, limit)
            }
            Err(CacheMiss::Expired(stale)) => revalidate(source, stale, limit, &policy).await?,
        };
        Ok::<_, PixError>(stream)
    })
    .try_flatten()
    .boxed()
}

async fn revalidate<T, S>(
    source: Arc<S>,
    stale: CacheMetadata,
    limit: FetchLimit,
    policy: &RevalidationPolicy,
) -> Result<MediatedStream<T>>
where
    T: Clone + Send + 'static,
    S: CollectionSource<T> + ?Sized + 'static,
{
    if policy.too_old(&stale, Utc::now()) {
        info!(
            "append: cache from {} is past the rebuild age, rebuilding",
            stale.updated_at
        );
        return Ok(rebuild(source, limit));
    }

    let head = fetch_items(source.as_ref(), FetchLimit::pages(policy.verify_pages.max(1))).await?;
    let head_len = head.len();
    let verified = stale.with_updated_at(Utc::now());
    let overlapped = source.append_local(head, verified).await?;
    debug!(
        "append: verification wrote {} head items (overlap: {})",
        head_len, overlapped
    );

    if !overlapped && policy.rebuild_on_drift {
        warn!("append: no overlap with the cached head, rebuilding");
        return Ok(rebuild(source, limit));
    }

    match source.read_local().await? {
        Ok(fresh) => Ok(from_cache(source, fresh, limit)),
        Err(miss) => {
            warn!("append: cache still {} after verification, rebuilding", miss);
            Ok(rebuild(source, limit))
        }
    }
}
