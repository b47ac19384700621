//! Seams between the mediators and their storage / upstream.

use crate::cache::{CacheMetadata, Cursor, Lookup};
use crate::error::Result;
use crate::network::{FetchLimit, RemoteEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Local and remote access for a single-value resource.
#[async_trait]
pub trait SingleSource<T>: Send + Sync {
    /// Freshness-checked local read.
    async fn read_local(&self) -> Result<Lookup<(CacheMetadata, T)>>;

    async fn fetch_remote(&self) -> Result<(CacheMetadata, T)>;

    async fn write_local(&self, value: &T, metadata: &CacheMetadata) -> Result<()>;
}

/// A fresh cached collection: its metadata and a lazy item stream.
pub struct CachedCollection<T> {
    pub metadata: CacheMetadata,
    pub items: BoxStream<'static, Result<T>>,
}

impl<T> std::fmt::Debug for CachedCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCollection")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Local and remote access for a paginated collection.
#[async_trait]
pub trait CollectionSource<T>: Send + Sync {
    /// Freshness-checked local read.
    async fn read_local(&self) -> Result<Lookup<CachedCollection<T>>>;

    /// Lazy remote fetch starting at `resume_from`, or the first page.
    fn fetch_remote(
        &self,
        resume_from: Option<Cursor>,
        limit: FetchLimit,
    ) -> BoxStream<'static, Result<RemoteEvent<T>>>;

    /// Replace the whole cached collection.
    async fn write_local(&self, items: Vec<T>, metadata: CacheMetadata) -> Result<()>;

    /// Upsert `items` and overwrite the metadata; reports whether any item
    /// was already cached.
    async fn append_local(&self, items: Vec<T>, metadata: CacheMetadata) -> Result<bool>;
}
