//! Single-value mediation.

use super::source::SingleSource;
use super::{Mediated, MediatedStream};
use crate::cache::CacheMetadata;
use crate::error::{PixError, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Serve a fresh local value, or fetch, persist and return a new one.
///
/// A hit never touches the remote or writes. A miss fetches exactly once
/// and writes exactly once; a failed write is returned as the error.
pub async fn mediate_single<T, S>(source: &S) -> Result<(CacheMetadata, T)>
where
    S: SingleSource<T> + ?Sized,
{
    match source.read_local().await? {
        Ok(hit) => {
            debug!("single: cache hit (updated {})", hit.0.updated_at);
            Ok(hit)
        }
        Err(miss) => {
            debug!("single: cache {}", miss);
            let (metadata, value) = source.fetch_remote().await?;
            if let Err(e) = source.write_local(&value, &metadata).await {
                warn!("single: write-back failed: {}", e);
                return Err(e);
            }
            Ok((metadata, value))
        }
    }
}

/// [`mediate_single`] as a two-element stream: metadata, then the value.
pub fn single_stream<T, S>(source: Arc<S>) -> MediatedStream<T>
where
    T: Send + 'static,
    S: SingleSource<T> + ?Sized + 'static,
{
    stream::once(async move {
        let (metadata, value) = mediate_single(source.as_ref()).await?;
        let elements: Vec<Result<Mediated<T>>> =
            vec![Ok(Mediated::Metadata(metadata)), Ok(Mediated::Item(value))];
        Ok::<_, PixError>(stream::iter(elements))
    })
    .try_flatten()
    .boxed()
}
