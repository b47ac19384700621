//! Replace-semantics collection mediation.
//!
//! For collections that are either complete or a strict prefix of the
//! upstream (rankings). An expired cache is simply rebuilt.

use super::collection::{from_cache, rebuild};
use super::source::CollectionSource;
use super::MediatedStream;
use crate::error::PixError;
use crate::network::FetchLimit;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Mediate a collection with replace semantics.
///
/// - fresh and complete: replay the cache, no remote call
/// - fresh prefix: replay it, resume from its cursor, append the new tail
/// - missing or expired: fetch from the first page and replace the cache
pub fn mediate_many<T, S>(source: Arc<S>, limit: FetchLimit) -> MediatedStream<T>
where
    T: Clone + Send + 'static,
    S: CollectionSource<T> + ?Sized + 'static,
{
    stream::once(async move {
        let stream = match source.read_local().await? {
            Ok(cached) => from_cache(source, cached, limit),
            Err(miss) => {
                debug!("many: cache {}, rebuilding", miss);
                rebuild(source, limit)
            }
        };
        Ok::<_, PixError>(stream)
    })
    .try_flatten()
    .boxed()
}
