//! Mediator sources backed by a [`LocalStore`].
//!
//! A binding fixes one key, one max age and one way of fetching, and turns
//! the store's raw records into the freshness-checked reads the mediators
//! expect. A record (or any item of a collection) that no longer decodes
//! is reported as missing, so it is refetched and overwritten.

use super::source::{CachedCollection, CollectionSource, SingleSource};
use crate::cache::{
    CacheMetadata, CacheMiss, Cacheable, Cursor, LocalStore, Lookup, ResourceKey, StoredItem,
};
use crate::error::Result;
use crate::network::{FetchLimit, Paginator, RemoteEvent};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Remote fetch for a single value.
pub type SingleFetch<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// [`SingleSource`] over a store record.
pub struct SingleBinding<T> {
    store: Arc<dyn LocalStore>,
    key: ResourceKey,
    max_age: Duration,
    fetch: SingleFetch<T>,
}

impl<T: Cacheable> SingleBinding<T> {
    pub fn new(
        store: Arc<dyn LocalStore>,
        key: ResourceKey,
        max_age: Duration,
        fetch: SingleFetch<T>,
    ) -> Self {
        Self {
            store,
            key,
            max_age,
            fetch,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

#[async_trait]
impl<T: Cacheable> SingleSource<T> for SingleBinding<T> {
    async fn read_local(&self) -> Result<Lookup<(CacheMetadata, T)>> {
        let Some(record) = self.store.read_single(&self.key).await? else {
            return Ok(Err(CacheMiss::Missing));
        };
        if let Err(miss) = record.metadata.check_fresh(self.max_age, Utc::now()) {
            return Ok(Err(miss));
        }
        match serde_json::from_slice(&record.payload) {
            Ok(value) => Ok(Ok((record.metadata, value))),
            Err(e) => {
                warn!("{}: cached record is unreadable ({}), refetching", self.key, e);
                Ok(Err(CacheMiss::Missing))
            }
        }
    }

    async fn fetch_remote(&self) -> Result<(CacheMetadata, T)> {
        let value = (self.fetch)().await?;
        Ok((CacheMetadata::now().with_page_count(Some(1)), value))
    }

    async fn write_local(&self, value: &T, metadata: &CacheMetadata) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.store.write_single(&self.key, payload, metadata).await
    }
}

/// [`CollectionSource`] over a store collection and a [`Paginator`].
pub struct CollectionBinding<T> {
    store: Arc<dyn LocalStore>,
    key: ResourceKey,
    max_age: Duration,
    paginator: Paginator<T>,
}

impl<T: Cacheable> CollectionBinding<T> {
    pub fn new(
        store: Arc<dyn LocalStore>,
        key: ResourceKey,
        max_age: Duration,
        paginator: Paginator<T>,
    ) -> Self {
        Self {
            store,
            key,
            max_age,
            paginator,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn encode(items: &[T]) -> Result<Vec<StoredItem>> {
        items.iter().map(StoredItem::encode).collect()
    }
}

#[async_trait]
impl<T: Cacheable> CollectionSource<T> for CollectionBinding<T> {
    async fn read_local(&self) -> Result<Lookup<CachedCollection<T>>> {
        let Some(stored) = self.store.read_collection(&self.key, 0).await? else {
            return Ok(Err(CacheMiss::Missing));
        };
        if let Err(miss) = stored.metadata.check_fresh(self.max_age, Utc::now()) {
            return Ok(Err(miss));
        }
        let (metadata, raw) = stored.collect().await?;
        let decoded: Result<Vec<T>> = raw.iter().map(|item| item.decode::<T>()).collect();
        match decoded {
            Ok(items) => Ok(Ok(CachedCollection {
                metadata,
                items: stream::iter(items.into_iter().map(Ok)).boxed(),
            })),
            Err(e) => {
                warn!("{}: cached collection is unreadable ({}), rebuilding", self.key, e);
                Ok(Err(CacheMiss::Missing))
            }
        }
    }

    fn fetch_remote(
        &self,
        resume_from: Option<Cursor>,
        limit: FetchLimit,
    ) -> BoxStream<'static, Result<RemoteEvent<T>>> {
        self.paginator.fetch(resume_from, limit)
    }

    async fn write_local(&self, items: Vec<T>, metadata: CacheMetadata) -> Result<()> {
        let items = Self::encode(&items)?;
        self.store
            .replace_collection(&self.key, items, &metadata)
            .await
    }

    async fn append_local(&self, items: Vec<T>, metadata: CacheMetadata) -> Result<bool> {
        let items = Self::encode(&items)?;
        self.store
            .append_collection(&self.key, items, &metadata)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::PixError;
    use crate::mediator::{collect_mediated, mediate_append, mediate_single, single_stream, Mediated};
    use crate::models::UserDetail;
    use crate::network::{Page, PageFetcher, RequestThrottle};
    use futures::{FutureExt, TryStreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user(id: u64) -> UserDetail {
        serde_json::from_value(serde_json::json!({
            "user": { "id": id, "name": format!("user{}", id) }
        }))
        .unwrap()
    }

    fn counting_fetch(calls: Arc<AtomicUsize>) -> SingleFetch<UserDetail> {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, PixError>(user(3)) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_single_binding_miss_then_hit() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let binding = SingleBinding::new(
            store,
            ResourceKey::user_detail(3),
            Duration::from_secs(60),
            counting_fetch(calls.clone()),
        );

        let (_, first) = mediate_single(&binding).await.unwrap();
        let (_, second) = mediate_single(&binding).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_binding_expired_refetches() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let binding = SingleBinding::new(
            store,
            ResourceKey::user_detail(3),
            Duration::ZERO,
            counting_fetch(calls.clone()),
        );

        mediate_single(&binding).await.unwrap();
        mediate_single(&binding).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_refetched() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let key = ResourceKey::user_detail(3);
        store
            .write_single(&key, b"not json".to_vec(), &CacheMetadata::now())
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let binding = Arc::new(SingleBinding::new(
            store,
            key,
            Duration::from_secs(60),
            counting_fetch(calls.clone()),
        ));

        let elements: Vec<_> = single_stream(binding).try_collect().await.unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1], Mediated::Item(user(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct OnePage;

    #[async_trait]
    impl PageFetcher<UserDetail> for OnePage {
        async fn fetch_page(&self, _cursor: Option<&Cursor>) -> Result<Page<UserDetail>> {
            Ok(Page::last(vec![user(1), user(2)]))
        }
    }

    #[tokio::test]
    async fn test_collection_binding_roundtrip() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let paginator = Paginator::new(Arc::new(OnePage), Arc::new(RequestThrottle::unlimited()));
        let binding = CollectionBinding::new(
            store,
            ResourceKey::user_illusts(1),
            Duration::from_secs(60),
            paginator,
        );

        assert!(matches!(binding.read_local().await.unwrap(), Err(CacheMiss::Missing)));

        let meta = CacheMetadata::now().with_cursor(Some(Cursor::new("next")));
        binding.write_local(vec![user(1)], meta.clone()).await.unwrap();
        let dup = binding
            .append_local(vec![user(1), user(2)], meta.clone())
            .await
            .unwrap();
        assert!(dup);

        let cached = binding.read_local().await.unwrap().unwrap();
        assert_eq!(cached.metadata, meta);
        let items: Vec<UserDetail> = cached.items.try_collect().await.unwrap();
        assert_eq!(items, vec![user(1), user(2)]);

        let events: Vec<_> = binding
            .fetch_remote(None, FetchLimit::unbounded())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_collection_item_reads_as_missing() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let key = ResourceKey::user_illusts(1);
        let good = StoredItem::encode(&user(1)).unwrap();
        let bad = StoredItem {
            id: "2".into(),
            payload: b"garbage".to_vec(),
        };
        store
            .replace_collection(&key, vec![good, bad], &CacheMetadata::now())
            .await
            .unwrap();

        let paginator = Paginator::new(Arc::new(OnePage), Arc::new(RequestThrottle::unlimited()));
        let binding = Arc::new(CollectionBinding::new(
            store.clone(),
            key.clone(),
            Duration::from_secs(60),
            paginator,
        ));
        assert!(matches!(binding.read_local().await.unwrap(), Err(CacheMiss::Missing)));

        // The rebuild replaces the unreadable rows.
        let (_, items) = collect_mediated(mediate_append(
            binding.clone(),
            FetchLimit::unbounded(),
            Default::default(),
        ))
        .await
        .unwrap();
        assert_eq!(items, vec![user(1), user(2)]);

        let cached = binding.read_local().await.unwrap().unwrap();
        let items: Vec<UserDetail> = cached.items.try_collect().await.unwrap();
        assert_eq!(items, vec![user(1), user(2)]);
    }
}
