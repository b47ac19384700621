//! Building blocks shared by the collection mediators.

use super::source::{CachedCollection, CollectionSource};
use super::{Mediated, MediatedStream};
use crate::cache::{CacheMetadata, Cursor};
use crate::error::Result;
use crate::network::{FetchLimit, RemoteEvent};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a finished remote fetch is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteBack {
    /// Full replace of the collection.
    Replace,
    /// Upsert of the fetched tail only.
    Append,
}

struct Tail<T, S: ?Sized> {
    source: Arc<S>,
    write_back: WriteBack,
    resume_from: Option<Cursor>,
    limit: FetchLimit,
    remote: Option<BoxStream<'static, Result<RemoteEvent<T>>>>,
    fetched: Vec<T>,
    pages: u32,
    cursor: Option<Cursor>,
    done: bool,
}

/// Stream a remote fetch, then persist what it produced.
///
/// Items are yielded as they arrive. Once the remote stream ends, the
/// collected items are written back and one trailing `Metadata` with the
/// final state follows. Nothing is written if the remote fails part way.
/// `base_pages` is the page count already held in the cache.
pub(crate) fn remote_tail<T, S>(
    source: Arc<S>,
    resume_from: Option<Cursor>,
    limit: FetchLimit,
    base_pages: u32,
    write_back: WriteBack,
) -> MediatedStream<T>
where
    T: Clone + Send + 'static,
    S: CollectionSource<T> + ?Sized + 'static,
{
    let tail = Tail {
        source,
        write_back,
        cursor: resume_from.clone(),
        resume_from,
        limit,
        remote: None,
        fetched: Vec::new(),
        pages: base_pages,
        done: false,
    };

    stream::try_unfold(tail, |mut tail| async move {
        if tail.done {
            return Ok(None);
        }
        if tail.remote.is_none() {
            debug!("collection: remote fetch from {:?}", tail.resume_from);
            tail.remote = Some(tail.source.fetch_remote(tail.resume_from.take(), tail.limit));
        }

        loop {
            let event = match tail.remote.as_mut() {
                Some(remote) => remote.try_next().await?,
                None => None,
            };
            match event {
                Some(RemoteEvent::Item(item)) => {
                    tail.fetched.push(item.clone());
                    return Ok(Some((Mediated::Item(item), tail)));
                }
                Some(RemoteEvent::PageEnd { next }) => {
                    tail.pages += 1;
                    tail.cursor = next;
                }
                None => {
                    tail.done = true;
                    tail.remote = None;
                    let metadata = CacheMetadata::now()
                        .with_page_count(Some(tail.pages))
                        .with_cursor(tail.cursor.take());
                    let items = std::mem::take(&mut tail.fetched);
                    let count = items.len();

                    let written = match tail.write_back {
                        WriteBack::Replace => {
                            tail.source.write_local(items, metadata.clone()).await
                        }
                        WriteBack::Append => tail
                            .source
                            .append_local(items, metadata.clone())
                            .await
                            .map(|_| ()),
                    };
                    if let Err(e) = written {
                        warn!("collection: write-back of {} items failed: {}", count, e);
                        return Err(e);
                    }

                    info!(
                        "collection: stored {} fetched items ({:?}, {} pages, complete: {})",
                        count,
                        tail.write_back,
                        tail.pages,
                        metadata.is_complete()
                    );
                    return Ok(Some((Mediated::Metadata(metadata), tail)));
                }
            }
        }
    })
    .boxed()
}

/// Fetch everything from the first page and replace the cache.
pub(crate) fn rebuild<T, S>(source: Arc<S>, limit: FetchLimit) -> MediatedStream<T>
where
    T: Clone + Send + 'static,
    S: CollectionSource<T> + ?Sized + 'static,
{
    remote_tail(source, None, limit, 0, WriteBack::Replace)
}

/// Serve a fresh cached collection, resuming the remote if it is a prefix.
///
/// A complete cache is replayed as-is. A prefix is replayed with its
/// leading metadata's page count zeroed, then the remote continues from the
/// stored cursor and only the new tail is appended.
pub(crate) fn from_cache<T, S>(
    source: Arc<S>,
    cached: CachedCollection<T>,
    limit: FetchLimit,
) -> MediatedStream<T>
where
    T: Clone + Send + 'static,
    S: CollectionSource<T> + ?Sized + 'static,
{
    let CachedCollection { metadata, items } = cached;
    let items = items.map_ok(Mediated::Item);

    match metadata.continuation_cursor.clone() {
        None => {
            debug!("collection: serving complete cache");
            stream::iter([Ok(Mediated::Metadata(metadata))])
                .chain(items)
                .boxed()
        }
        Some(cursor) => {
            debug!("collection: serving cached prefix, resuming at {}", cursor);
            let base_pages = metadata.page_count.unwrap_or(0);
            let lead = metadata.with_page_count(Some(0));
            stream::iter([Ok(Mediated::Metadata(lead))])
                .chain(items)
                .chain(remote_tail(
                    source,
                    Some(cursor),
                    limit,
                    base_pages,
                    WriteBack::Append,
                ))
                .boxed()
        }
    }
}

/// Drain a remote fetch into its items, dropping page markers.
pub(crate) async fn fetch_items<T, S>(source: &S, limit: FetchLimit) -> Result<Vec<T>>
where
    T: Send + 'static,
    S: CollectionSource<T> + ?Sized,
{
    source
        .fetch_remote(None, limit)
        .try_filter_map(|event| async move {
            Ok(match event {
                RemoteEvent::Item(item) => Some(item),
                RemoteEvent::PageEnd { .. } => None,
            })
        })
        .try_collect()
        .await
}
