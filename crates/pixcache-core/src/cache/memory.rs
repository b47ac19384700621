//! In-process store, for tests and for running without a database file.

use super::key::ResourceKey;
use super::metadata::CacheMetadata;
use super::traits::{LocalStore, StoredCollection, StoredItem, StoredRecord};
use crate::error::{PixError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct CollectionEntry {
    metadata: Option<CacheMetadata>,
    items: Vec<StoredItem>,
    positions: HashMap<String, usize>,
}

impl CollectionEntry {
    fn clear(&mut self) {
        self.items.clear();
        self.positions.clear();
    }

    /// Returns whether the item already existed.
    fn upsert(&mut self, item: StoredItem) -> bool {
        match self.positions.get(&item.id) {
            Some(&pos) => {
                self.items[pos] = item;
                true
            }
            None => {
                self.positions.insert(item.id.clone(), self.items.len());
                self.items.push(item);
                false
            }
        }
    }

    fn set_metadata(&mut self, incoming: &CacheMetadata) {
        self.metadata = Some(merge_metadata(self.metadata.as_ref(), incoming));
    }
}

#[derive(Debug, Default)]
struct Tables {
    singles: HashMap<String, StoredRecord>,
    collections: HashMap<String, CollectionEntry>,
}

/// `HashMap`-backed [`LocalStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|e| PixError::Database {
            message: format!("Failed to lock memory store: {}", e),
            source: None,
        })
    }

    /// Number of stored records of either shape.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|t| t.singles.len() + t.collections.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keep `updated_at` monotonic per key.
fn merge_metadata(existing: Option<&CacheMetadata>, incoming: &CacheMetadata) -> CacheMetadata {
    match existing {
        Some(old) if old.updated_at > incoming.updated_at => {
            incoming.with_updated_at(old.updated_at)
        }
        _ => incoming.clone(),
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn read_single(&self, key: &ResourceKey) -> Result<Option<StoredRecord>> {
        Ok(self.lock()?.singles.get(&key.storage_key()).cloned())
    }

    async fn write_single(
        &self,
        key: &ResourceKey,
        payload: Vec<u8>,
        metadata: &CacheMetadata,
    ) -> Result<()> {
        let mut tables = self.lock()?;
        let storage_key = key.storage_key();
        let metadata = merge_metadata(
            tables.singles.get(&storage_key).map(|r| &r.metadata),
            metadata,
        );
        tables
            .singles
            .insert(storage_key, StoredRecord { metadata, payload });
        Ok(())
    }

    async fn read_collection(
        &self,
        key: &ResourceKey,
        offset: usize,
    ) -> Result<Option<StoredCollection>> {
        let tables = self.lock()?;
        let Some(entry) = tables.collections.get(&key.storage_key()) else {
            return Ok(None);
        };
        let Some(metadata) = entry.metadata.clone() else {
            return Ok(None);
        };
        let items = entry.items.iter().skip(offset).cloned().collect();
        Ok(Some(StoredCollection::from_items(metadata, items)))
    }

    async fn replace_collection(
        &self,
        key: &ResourceKey,
        items: Vec<StoredItem>,
        metadata: &CacheMetadata,
    ) -> Result<()> {
        let mut tables = self.lock()?;
        let entry = tables.collections.entry(key.storage_key()).or_default();
        entry.clear();
        for item in items {
            entry.upsert(item);
        }
        entry.set_metadata(metadata);
        Ok(())
    }

    async fn append_collection(
        &self,
        key: &ResourceKey,
        items: Vec<StoredItem>,
        metadata: &CacheMetadata,
    ) -> Result<bool> {
        let mut tables = self.lock()?;
        let entry = tables.collections.entry(key.storage_key()).or_default();
        let mut had_duplicates = false;
        for item in items {
            had_duplicates |= entry.upsert(item);
        }
        entry.set_metadata(metadata);
        Ok(had_duplicates)
    }

    async fn invalidate(&self, key: &ResourceKey) -> Result<bool> {
        let mut tables = self.lock()?;
        let storage_key = key.storage_key();
        let single = tables.singles.remove(&storage_key).is_some();
        let collection = tables.collections.remove(&storage_key).is_some();
        Ok(single || collection)
    }

    async fn invalidate_all(&self) -> Result<()> {
        let mut tables = self.lock()?;
        tables.singles.clear();
        tables.collections.clear();
        Ok(())
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut tables = self.lock()?;
        let before = tables.singles.len() + tables.collections.len();
        tables.singles.retain(|_, r| r.metadata.age(now) < age);
        tables.collections.retain(|_, c| {
            c.metadata
                .as_ref()
                .is_some_and(|meta| meta.age(now) < age)
        });
        Ok(before - (tables.singles.len() + tables.collections.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::metadata::Cursor;
    use chrono::Duration as ChronoDuration;

    fn item(id: &str, body: &str) -> StoredItem {
        StoredItem {
            id: id.to_string(),
            payload: body.as_bytes().to_vec(),
        }
    }

    fn key() -> ResourceKey {
        ResourceKey::user_illusts(5)
    }

    #[tokio::test]
    async fn test_single_roundtrip() {
        let store = MemoryStore::new();
        let meta = CacheMetadata::now();
        store
            .write_single(&ResourceKey::illust(1), b"{}".to_vec(), &meta)
            .await
            .unwrap();
        let record = store
            .read_single(&ResourceKey::illust(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.payload, b"{}");
        assert_eq!(record.metadata, meta);
    }

    #[tokio::test]
    async fn test_updated_at_is_monotonic() {
        let store = MemoryStore::new();
        let newer = CacheMetadata::now();
        let older = newer.with_updated_at(newer.updated_at - ChronoDuration::hours(1));

        store
            .replace_collection(&key(), vec![item("1", "a")], &newer)
            .await
            .unwrap();
        store
            .append_collection(&key(), vec![item("2", "b")], &older)
            .await
            .unwrap();

        let read = store.read_collection(&key(), 0).await.unwrap().unwrap();
        assert_eq!(read.metadata.updated_at, newer.updated_at);
    }

    #[tokio::test]
    async fn test_append_upserts_and_reports_duplicates() {
        let store = MemoryStore::new();
        let meta = CacheMetadata::now().with_cursor(Some(Cursor::new("c1")));
        let dup = store
            .append_collection(&key(), vec![item("1", "a"), item("2", "b")], &meta)
            .await
            .unwrap();
        assert!(!dup);

        let dup = store
            .append_collection(&key(), vec![item("2", "b2"), item("3", "c")], &meta)
            .await
            .unwrap();
        assert!(dup);

        let (read_meta, items) = store
            .read_collection(&key(), 0)
            .await
            .unwrap()
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(read_meta.continuation_cursor, Some(Cursor::new("c1")));
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(items[1].payload, b"b2");
    }

    #[tokio::test]
    async fn test_read_with_offset() {
        let store = MemoryStore::new();
        store
            .replace_collection(
                &key(),
                vec![item("1", "a"), item("2", "b"), item("3", "c")],
                &CacheMetadata::now(),
            )
            .await
            .unwrap();
        let (_, items) = store
            .read_collection(&key(), 2)
            .await
            .unwrap()
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(items, vec![item("3", "c")]);
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let store = MemoryStore::new();
        let stale = CacheMetadata::new(Utc::now() - ChronoDuration::days(3));
        store
            .write_single(&ResourceKey::illust(1), vec![], &stale)
            .await
            .unwrap();
        store
            .write_single(&ResourceKey::illust(2), vec![], &CacheMetadata::now())
            .await
            .unwrap();
        store
            .replace_collection(&key(), vec![item("1", "a")], &CacheMetadata::now())
            .await
            .unwrap();

        let purged = store
            .purge_older_than(Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.len(), 2);

        assert!(store.invalidate(&key()).await.unwrap());
        assert!(!store.invalidate(&key()).await.unwrap());
        store.invalidate_all().await.unwrap();
        assert!(store.is_empty());
    }
}
