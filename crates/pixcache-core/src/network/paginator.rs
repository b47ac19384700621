//! Cursor-driven pagination over a [`PageFetcher`].
//!
//! A [`Paginator`] turns one-page-at-a-time fetches into a lazy stream of
//! [`RemoteEvent`]s. Nothing is requested until the stream is polled, and
//! dropping the stream stops pagination after the current page.

use super::filter::ItemFilter;
use super::throttle::RequestThrottle;
use crate::cache::Cursor;
use crate::error::{PixError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One page returned by the upstream.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Where the next page starts; `None` once the upstream is exhausted.
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<Cursor>) -> Self {
        Self { items, next }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Transport contract: fetch a single page.
///
/// `cursor == None` requests the first page.
#[async_trait]
pub trait PageFetcher<T>: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page<T>>;
}

/// Element of a remote fetch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent<T> {
    Item(T),
    /// Emitted after every page's items. `next` is the cursor to resume
    /// from, or `None` when the upstream has no more pages.
    PageEnd { next: Option<Cursor> },
}

/// Stop condition for one fetch.
///
/// The item cap is checked between pages, so a fetch never stops in the
/// middle of a page and the resume cursor never skips items. Only items
/// that passed the filter count towards it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchLimit {
    pub max_pages: Option<u32>,
    pub max_items: Option<usize>,
}

impl FetchLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn pages(max_pages: u32) -> Self {
        Self {
            max_pages: Some(max_pages),
            max_items: None,
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    fn reached(&self, pages: u32, items: usize) -> bool {
        self.max_pages.is_some_and(|max| pages >= max)
            || self.max_items.is_some_and(|max| items >= max)
    }
}

/// Paginating, filtering, throttled view over a [`PageFetcher`].
pub struct Paginator<T> {
    fetcher: Arc<dyn PageFetcher<T>>,
    throttle: Arc<RequestThrottle>,
    filter: Option<ItemFilter<T>>,
    label: Arc<str>,
}

impl<T> Clone for Paginator<T> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            throttle: self.throttle.clone(),
            filter: self.filter.clone(),
            label: self.label.clone(),
        }
    }
}

struct PageState<T> {
    paginator: Paginator<T>,
    cursor: Option<Cursor>,
    pages: u32,
    items: usize,
    finished: bool,
}

impl<T: Send + 'static> Paginator<T> {
    pub fn new(fetcher: Arc<dyn PageFetcher<T>>, throttle: Arc<RequestThrottle>) -> Self {
        Self {
            fetcher,
            throttle,
            filter: None,
            label: Arc::from("fetch"),
        }
    }

    pub fn with_filter(mut self, filter: Option<ItemFilter<T>>) -> Self {
        self.filter = filter;
        self
    }

    /// Name used in log lines.
    pub fn with_label(mut self, label: impl AsRef<str>) -> Self {
        self.label = Arc::from(label.as_ref());
        self
    }

    fn keep(&self, item: &T) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(item))
    }

    async fn fetch_one(&self, cursor: Option<&Cursor>) -> Result<Page<T>> {
        let fetcher = &self.fetcher;
        self.throttle
            .call(&self.label, || fetcher.fetch_page(cursor))
            .await
    }

    /// Stream items starting at `resume_from` (or the first page).
    pub fn fetch(
        &self,
        resume_from: Option<Cursor>,
        limit: FetchLimit,
    ) -> BoxStream<'static, Result<RemoteEvent<T>>> {
        let state = PageState {
            paginator: self.clone(),
            cursor: resume_from,
            pages: 0,
            items: 0,
            finished: false,
        };

        stream::try_unfold(state, move |mut state| async move {
            if state.finished {
                return Ok::<_, PixError>(None);
            }

            let page = state.paginator.fetch_one(state.cursor.as_ref()).await?;
            state.pages += 1;

            let fetched = page.items.len();
            let mut events: Vec<RemoteEvent<T>> = page
                .items
                .into_iter()
                .filter(|item| state.paginator.keep(item))
                .map(RemoteEvent::Item)
                .collect();
            state.items += events.len();
            debug!(
                "{}: page {} kept {}/{} items",
                state.paginator.label,
                state.pages,
                events.len(),
                fetched
            );

            let stalled = page.next.is_some() && page.next == state.cursor;
            if stalled {
                warn!(
                    "{}: upstream returned the same cursor twice, stopping",
                    state.paginator.label
                );
            }

            match &page.next {
                None => info!(
                    "{}: upstream exhausted after {} pages ({} items)",
                    state.paginator.label, state.pages, state.items
                ),
                Some(_) if limit.reached(state.pages, state.items) => debug!(
                    "{}: fetch limit reached after {} pages",
                    state.paginator.label, state.pages
                ),
                Some(_) => {}
            }

            state.finished =
                page.next.is_none() || stalled || limit.reached(state.pages, state.items);
            events.push(RemoteEvent::PageEnd {
                next: page.next.clone(),
            });
            state.cursor = page.next;

            Ok(Some((events, state)))
        })
        .map_ok(|events| stream::iter(events.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}
