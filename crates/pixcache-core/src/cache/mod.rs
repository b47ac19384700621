//! Cache records, freshness model and local stores.
//!
//! - [`ResourceKey`] names one cacheable resource
//! - [`CacheMetadata`] / [`CacheMiss`] describe freshness and resumability
//! - [`LocalStore`] is the persistence contract, with SQLite and in-memory
//!   implementations

mod key;
mod memory;
mod metadata;
mod sqlite;
mod traits;

pub use key::{ResourceKey, ResourceKind};
pub use memory::MemoryStore;
pub use metadata::{CacheMetadata, CacheMiss, Cursor, Lookup};
pub use sqlite::SqliteStore;
pub use traits::{Cacheable, LocalStore, StoredCollection, StoredItem, StoredRecord};
