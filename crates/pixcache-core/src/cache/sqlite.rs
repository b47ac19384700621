//! SQLite-backed local store.

use super::key::ResourceKey;
use super::metadata::{CacheMetadata, Cursor};
use super::traits::{LocalStore, StoredCollection, StoredItem, StoredRecord};
use crate::config::StoreConfig;
use crate::error::{PixError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// SQLite-based [`LocalStore`].
///
/// Single records and collections live in separate tables; collection items
/// are ordered by an insertion sequence number and unique per item id.
/// Thread-safe via internal mutex on the connection; every operation runs on
/// the blocking pool.
pub struct SqliteStore {
    /// Database connection (wrapped for thread safety).
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the specified database path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PixError::Io {
                message: format!("Failed to create cache directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| PixError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        // Other processes may hold the write lock briefly
        conn.busy_timeout(StoreConfig::BUSY_TIMEOUT)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| PixError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::from_connection(conn)
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| PixError::Database {
            message: format!("Failed to open in-memory database: {}", e),
            source: Some(e),
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| PixError::Database {
                message: format!("Failed to lock database: {}", e),
                source: None,
            })?;
            op(&mut guard)
        })
        .await
        .map_err(|e| PixError::Other(format!("Store task failed: {}", e)))?
    }
}

/// Initialize database schema.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Single-value records
        CREATE TABLE IF NOT EXISTS single_records (
            key TEXT PRIMARY KEY,
            payload BLOB NOT NULL,
            updated_at TEXT NOT NULL,
            page_count INTEGER,
            continuation_cursor TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_single_updated
            ON single_records(updated_at);

        -- Collection metadata
        CREATE TABLE IF NOT EXISTS collection_records (
            key TEXT PRIMARY KEY,
            updated_at TEXT NOT NULL,
            page_count INTEGER,
            continuation_cursor TEXT,
            next_seq INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_collection_updated
            ON collection_records(updated_at);

        -- Collection items, unique per (key, item_id)
        CREATE TABLE IF NOT EXISTS collection_items (
            key TEXT NOT NULL,
            item_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            payload BLOB NOT NULL,
            PRIMARY KEY (key, item_id)
        );

        CREATE INDEX IF NOT EXISTS idx_collection_items_order
            ON collection_items(key, seq);
        "#,
    )
    .map_err(|e| PixError::Database {
        message: format!("Failed to initialize cache schema: {}", e),
        source: Some(e),
    })
}

/// Fixed-width UTC timestamps so that string comparison orders correctly.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Unparseable timestamps read as the epoch, which makes the record stale.
fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn row_metadata(updated_at: String, page_count: Option<i64>, cursor: Option<String>) -> CacheMetadata {
    CacheMetadata {
        updated_at: parse_time(&updated_at),
        page_count: page_count.map(|p| p as u32),
        continuation_cursor: cursor.map(Cursor::new),
    }
}

fn upsert_collection_record(tx: &Transaction<'_>, key: &str, metadata: &CacheMetadata) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO collection_records (key, updated_at, page_count, continuation_cursor)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(key) DO UPDATE SET
            updated_at = MAX(updated_at, excluded.updated_at),
            page_count = excluded.page_count,
            continuation_cursor = excluded.continuation_cursor
        "#,
        params![
            key,
            format_time(metadata.updated_at),
            metadata.page_count.map(i64::from),
            metadata.continuation_cursor.as_ref().map(Cursor::as_str),
        ],
    )
    .map_err(|e| PixError::Database {
        message: format!("Failed to write collection metadata: {}", e),
        source: Some(e),
    })?;
    Ok(())
}

/// Insert or update one item. Returns whether it already existed.
fn upsert_item(tx: &Transaction<'_>, key: &str, item: &StoredItem, next_seq: &mut i64) -> Result<bool> {
    let existed = tx
        .query_row(
            "SELECT 1 FROM collection_items WHERE key = ?1 AND item_id = ?2",
            params![key, item.id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    if existed {
        tx.execute(
            "UPDATE collection_items SET payload = ?3 WHERE key = ?1 AND item_id = ?2",
            params![key, item.id, item.payload],
        )?;
    } else {
        tx.execute(
            "INSERT INTO collection_items (key, item_id, seq, payload) VALUES (?1, ?2, ?3, ?4)",
            params![key, item.id, *next_seq, item.payload],
        )?;
        *next_seq += 1;
    }

    Ok(existed)
}

fn store_next_seq(tx: &Transaction<'_>, key: &str, next_seq: i64) -> Result<()> {
    tx.execute(
        "UPDATE collection_records SET next_seq = ?2 WHERE key = ?1",
        params![key, next_seq],
    )?;
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn read_single(&self, key: &ResourceKey) -> Result<Option<StoredRecord>> {
        let key = key.storage_key();
        self.run(move |conn| {
            let row: Option<(Vec<u8>, String, Option<i64>, Option<String>)> = conn
                .query_row(
                    r#"
                    SELECT payload, updated_at, page_count, continuation_cursor
                    FROM single_records
                    WHERE key = ?1
                    "#,
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(|e| PixError::Database {
                    message: format!("Failed to query single record: {}", e),
                    source: Some(e),
                })?;

            Ok(row.map(|(payload, updated_at, page_count, cursor)| StoredRecord {
                metadata: row_metadata(updated_at, page_count, cursor),
                payload,
            }))
        })
        .await
    }

    async fn write_single(
        &self,
        key: &ResourceKey,
        payload: Vec<u8>,
        metadata: &CacheMetadata,
    ) -> Result<()> {
        let key = key.storage_key();
        let metadata = metadata.clone();
        self.run(move |conn| {
            conn.execute(
                r#"
                INSERT INTO single_records (key, payload, updated_at, page_count, continuation_cursor)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(key) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = MAX(updated_at, excluded.updated_at),
                    page_count = excluded.page_count,
                    continuation_cursor = excluded.continuation_cursor
                "#,
                params![
                    key,
                    payload,
                    format_time(metadata.updated_at),
                    metadata.page_count.map(i64::from),
                    metadata.continuation_cursor.as_ref().map(Cursor::as_str),
                ],
            )
            .map_err(|e| PixError::Database {
                message: format!("Failed to write single record: {}", e),
                source: Some(e),
            })?;
            Ok(())
        })
        .await
    }

    async fn read_collection(
        &self,
        key: &ResourceKey,
        offset: usize,
    ) -> Result<Option<StoredCollection>> {
        let key = key.storage_key();
        self.run(move |conn| {
            let row: Option<(String, Option<i64>, Option<String>)> = conn
                .query_row(
                    r#"
                    SELECT updated_at, page_count, continuation_cursor
                    FROM collection_records
                    WHERE key = ?1
                    "#,
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| PixError::Database {
                    message: format!("Failed to query collection record: {}", e),
                    source: Some(e),
                })?;

            let Some((updated_at, page_count, cursor)) = row else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                r#"
                SELECT item_id, payload
                FROM collection_items
                WHERE key = ?1
                ORDER BY seq ASC
                LIMIT -1 OFFSET ?2
                "#,
            )?;
            let items = stmt
                .query_map(params![key, offset as i64], |row| {
                    Ok(StoredItem {
                        id: row.get(0)?,
                        payload: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(StoredCollection::from_items(
                row_metadata(updated_at, page_count, cursor),
                items,
            )))
        })
        .await
    }

    async fn replace_collection(
        &self,
        key: &ResourceKey,
        items: Vec<StoredItem>,
        metadata: &CacheMetadata,
    ) -> Result<()> {
        let key = key.storage_key();
        let metadata = metadata.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM collection_items WHERE key = ?1", params![key])?;
            upsert_collection_record(&tx, &key, &metadata)?;

            let mut next_seq = 0i64;
            for item in &items {
                upsert_item(&tx, &key, item, &mut next_seq)?;
            }
            store_next_seq(&tx, &key, next_seq)?;
            tx.commit()?;

            debug!("Replaced collection {} with {} items", key, items.len());
            Ok(())
        })
        .await
    }

    async fn append_collection(
        &self,
        key: &ResourceKey,
        items: Vec<StoredItem>,
        metadata: &CacheMetadata,
    ) -> Result<bool> {
        let key = key.storage_key();
        let metadata = metadata.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            upsert_collection_record(&tx, &key, &metadata)?;

            let mut next_seq: i64 = tx.query_row(
                "SELECT next_seq FROM collection_records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            let mut had_duplicates = false;
            for item in &items {
                had_duplicates |= upsert_item(&tx, &key, item, &mut next_seq)?;
            }
            store_next_seq(&tx, &key, next_seq)?;
            tx.commit()?;

            debug!(
                "Appended {} items to {} (duplicates: {})",
                items.len(),
                key,
                had_duplicates
            );
            Ok(had_duplicates)
        })
        .await
    }

    async fn invalidate(&self, key: &ResourceKey) -> Result<bool> {
        let key = key.storage_key();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let singles = tx.execute("DELETE FROM single_records WHERE key = ?1", params![key])?;
            let collections =
                tx.execute("DELETE FROM collection_records WHERE key = ?1", params![key])?;
            tx.execute("DELETE FROM collection_items WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(singles + collections > 0)
        })
        .await
    }

    async fn invalidate_all(&self) -> Result<()> {
        self.run(|conn| {
            conn.execute_batch(
                r#"
                DELETE FROM single_records;
                DELETE FROM collection_records;
                DELETE FROM collection_items;
                "#,
            )
            .map_err(|e| PixError::Database {
                message: format!("Failed to clear cache: {}", e),
                source: Some(e),
            })?;
            debug!("Cleared all cached records");
            Ok(())
        })
        .await
    }

    async fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cutoff = format_time(cutoff);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let singles = tx.execute(
                "DELETE FROM single_records WHERE updated_at < ?1",
                params![cutoff],
            )?;
            tx.execute(
                r#"
                DELETE FROM collection_items WHERE key IN (
                    SELECT key FROM collection_records WHERE updated_at < ?1
                )
                "#,
                params![cutoff],
            )?;
            let collections = tx.execute(
                "DELETE FROM collection_records WHERE updated_at < ?1",
                params![cutoff],
            )?;
            tx.commit()?;

            let purged = singles + collections;
            if purged > 0 {
                debug!("Purged {} expired cache records", purged);
            }
            Ok(purged)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("cache.sqlite");
        let store = SqliteStore::new(&db_path).unwrap();
        (temp_dir, store)
    }

    fn item(id: &str, body: &str) -> StoredItem {
        StoredItem {
            id: id.to_string(),
            payload: body.as_bytes().to_vec(),
        }
    }

    fn ids(items: &[StoredItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_single_set_and_get() {
        let (_temp, store) = create_test_store();
        let key = ResourceKey::illust(3);
        let meta = CacheMetadata::now().with_page_count(Some(1));

        assert!(store.read_single(&key).await.unwrap().is_none());
        store.write_single(&key, b"hello".to_vec(), &meta).await.unwrap();

        let record = store.read_single(&key).await.unwrap().unwrap();
        assert_eq!(record.payload, b"hello");
        assert_eq!(record.metadata.page_count, Some(1));
        assert_eq!(
            format_time(record.metadata.updated_at),
            format_time(meta.updated_at)
        );
    }

    #[tokio::test]
    async fn test_single_updated_at_never_regresses() {
        let (_temp, store) = create_test_store();
        let key = ResourceKey::user_detail(3);
        let newer = CacheMetadata::now();
        let older = newer.with_updated_at(newer.updated_at - chrono::Duration::minutes(5));

        store.write_single(&key, b"new".to_vec(), &newer).await.unwrap();
        store.write_single(&key, b"old".to_vec(), &older).await.unwrap();

        let record = store.read_single(&key).await.unwrap().unwrap();
        assert_eq!(record.payload, b"old");
        assert_eq!(
            format_time(record.metadata.updated_at),
            format_time(newer.updated_at)
        );
    }

    #[tokio::test]
    async fn test_replace_then_append() {
        let (_temp, store) = create_test_store();
        let key = ResourceKey::user_illusts(9);
        let meta = CacheMetadata::now().with_cursor(Some(Cursor::new("page-2")));

        store
            .replace_collection(&key, vec![item("a", "1"), item("b", "2")], &meta)
            .await
            .unwrap();
        let dup = store
            .append_collection(
                &key,
                vec![item("b", "2*"), item("c", "3")],
                &meta.with_cursor(None),
            )
            .await
            .unwrap();
        assert!(dup);

        let (read_meta, items) = store
            .read_collection(&key, 0)
            .await
            .unwrap()
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert!(read_meta.is_complete());
        assert_eq!(ids(&items), vec!["a", "b", "c"]);
        assert_eq!(items[1].payload, b"2*");

        // Replace wipes previous items
        store
            .replace_collection(&key, vec![item("z", "9")], &CacheMetadata::now())
            .await
            .unwrap();
        let (_, items) = store
            .read_collection(&key, 0)
            .await
            .unwrap()
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["z"]);
    }

    #[tokio::test]
    async fn test_append_creates_collection() {
        let (_temp, store) = create_test_store();
        let key = ResourceKey::user_illusts(10);
        let dup = store
            .append_collection(&key, vec![item("x", "1")], &CacheMetadata::now())
            .await
            .unwrap();
        assert!(!dup);

        let (_, items) = store
            .read_collection(&key, 0)
            .await
            .unwrap()
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["x"]);
    }

    #[tokio::test]
    async fn test_read_collection_offset() {
        let (_temp, store) = create_test_store();
        let key = ResourceKey::ranking(crate::models::RankingMode::Day, None);
        store
            .replace_collection(
                &key,
                vec![item("1", "a"), item("2", "b"), item("3", "c")],
                &CacheMetadata::now(),
            )
            .await
            .unwrap();
        let (_, items) = store
            .read_collection(&key, 1)
            .await
            .unwrap()
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(ids(&items), vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (_temp, store) = create_test_store();
        let key = ResourceKey::user_illusts(1);
        store
            .replace_collection(&key, vec![item("1", "a")], &CacheMetadata::now())
            .await
            .unwrap();

        assert!(store.invalidate(&key).await.unwrap());
        assert!(store.read_collection(&key, 0).await.unwrap().is_none());
        assert!(!store.invalidate(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let (_temp, store) = create_test_store();
        let old = CacheMetadata::new(Utc::now() - chrono::Duration::days(10));
        store
            .write_single(&ResourceKey::illust(1), vec![1], &old)
            .await
            .unwrap();
        store
            .replace_collection(&ResourceKey::user_illusts(1), vec![item("1", "a")], &old)
            .await
            .unwrap();
        store
            .write_single(&ResourceKey::illust(2), vec![2], &CacheMetadata::now())
            .await
            .unwrap();

        let purged = store
            .purge_older_than(Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(purged, 2);
        assert!(store.read_single(&ResourceKey::illust(2)).await.unwrap().is_some());
        assert!(store
            .read_collection(&ResourceKey::user_illusts(1), 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .write_single(&ResourceKey::illust(1), vec![1], &CacheMetadata::now())
            .await
            .unwrap();
        store.invalidate_all().await.unwrap();
        assert!(store.read_single(&ResourceKey::illust(1)).await.unwrap().is_none());
    }
}
