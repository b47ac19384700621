//! Remote side of the cache: HTTP client, pagination, retries and throttling.
//!
//! - [`Paginator`] streams [`RemoteEvent`]s from any [`PageFetcher`]
//! - [`RequestThrottle`] applies the global concurrency cap, rate quota and
//!   retry policy to every upstream call
//! - [`HttpUpstream`] / [`HttpPageFetcher`] talk to the app API

mod client;
mod filter;
mod http;
mod paginator;
mod retry;
mod throttle;

pub use client::{ApiClient, RateLimitState};
pub use filter::{IllustFilter, ItemFilter};
pub use http::{parse_page, HttpPageFetcher, HttpUpstream};
pub use paginator::{FetchLimit, Page, PageFetcher, Paginator, RemoteEvent};
pub use retry::{retry_async, RetryConfig, RetryStats};
pub use throttle::RequestThrottle;

use crate::cache::ResourceKey;
use crate::error::Result;
use crate::models::{Illust, UserDetail};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything the facade needs from the upstream service.
///
/// Implementations perform a single attempt per call; throttling and retries
/// are applied by the caller.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn illust(&self, id: u64) -> Result<Illust>;

    async fn user_detail(&self, user_id: u64) -> Result<UserDetail>;

    /// Page source for a listing key (search, user works, ranking).
    fn illust_pages(&self, key: &ResourceKey) -> Result<Arc<dyn PageFetcher<Illust>>>;
}
