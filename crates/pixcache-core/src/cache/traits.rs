//! Local store trait and record types.

use super::key::ResourceKey;
use super::metadata::CacheMetadata;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Items that can be stored in a cached collection.
///
/// `cache_id` identifies an item within its collection; appends upsert on it.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn cache_id(&self) -> String;
}

/// One serialized collection item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub id: String,
    pub payload: Vec<u8>,
}

impl StoredItem {
    pub fn encode<T: Cacheable>(item: &T) -> Result<Self> {
        Ok(Self {
            id: item.cache_id(),
            payload: serde_json::to_vec(item)?,
        })
    }

    pub fn decode<T: Cacheable>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// A serialized single-value record.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub metadata: CacheMetadata,
    pub payload: Vec<u8>,
}

/// A collection read: metadata first, then a lazy stream of stored items.
pub struct StoredCollection {
    pub metadata: CacheMetadata,
    pub items: BoxStream<'static, Result<StoredItem>>,
}

impl StoredCollection {
    /// Wrap already-loaded items.
    pub fn from_items(metadata: CacheMetadata, items: Vec<StoredItem>) -> Self {
        Self {
            metadata,
            items: stream::iter(items.into_iter().map(Ok)).boxed(),
        }
    }

    /// Drain the item stream.
    pub async fn collect(self) -> Result<(CacheMetadata, Vec<StoredItem>)> {
        let items = self.items.try_collect().await?;
        Ok((self.metadata, items))
    }
}

impl std::fmt::Debug for StoredCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCollection")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Persistent store for single records and ordered collections.
///
/// Stores hand back raw metadata and never judge freshness; callers decide
/// what counts as expired. All writes are idempotent upserts: the engine may
/// write overlapping data from its verification and append paths, and more
/// than one process may share a store. `updated_at` never moves backwards
/// for a key.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read a single-value record.
    async fn read_single(&self, key: &ResourceKey) -> Result<Option<StoredRecord>>;

    /// Insert or overwrite a single-value record.
    async fn write_single(
        &self,
        key: &ResourceKey,
        payload: Vec<u8>,
        metadata: &CacheMetadata,
    ) -> Result<()>;

    /// Read a collection, skipping the first `offset` items.
    async fn read_collection(
        &self,
        key: &ResourceKey,
        offset: usize,
    ) -> Result<Option<StoredCollection>>;

    /// Replace a collection and its metadata wholesale.
    async fn replace_collection(
        &self,
        key: &ResourceKey,
        items: Vec<StoredItem>,
        metadata: &CacheMetadata,
    ) -> Result<()>;

    /// Upsert items into a collection and overwrite its metadata.
    ///
    /// Items already present (by id) are updated in place; new items are
    /// appended in the given order. Returns whether any incoming item
    /// already existed.
    async fn append_collection(
        &self,
        key: &ResourceKey,
        items: Vec<StoredItem>,
        metadata: &CacheMetadata,
    ) -> Result<bool>;

    /// Delete every record stored under `key`.
    async fn invalidate(&self, key: &ResourceKey) -> Result<bool>;

    /// Delete everything.
    async fn invalidate_all(&self) -> Result<()>;

    /// Delete records whose `updated_at` is older than `age`.
    ///
    /// Returns the number of records removed.
    async fn purge_older_than(&self, age: Duration) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Illust, UserSummary};
    use chrono::Utc;

    fn illust(id: u64) -> Illust {
        Illust {
            id,
            title: format!("work {}", id),
            kind: Default::default(),
            user: UserSummary {
                id: 1,
                name: "a".into(),
                account: None,
            },
            tags: vec![],
            total_bookmarks: 0,
            total_view: 0,
            page_count: 1,
            create_date: Utc::now(),
            image_urls: Default::default(),
            x_restrict: 0,
        }
    }

    #[test]
    fn test_stored_item_codec() {
        let original = illust(9);
        let stored = StoredItem::encode(&original).unwrap();
        assert_eq!(stored.id, "9");
        let decoded: Illust = stored.decode().unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_stored_collection_collect() {
        let items = vec![
            StoredItem::encode(&illust(1)).unwrap(),
            StoredItem::encode(&illust(2)).unwrap(),
        ];
        let collection = StoredCollection::from_items(CacheMetadata::now(), items.clone());
        let (_, collected) = collection.collect().await.unwrap();
        assert_eq!(collected, items);
    }
}
