//! Illustration lookups and listings on PixCache.

use chrono::NaiveDate;
use tracing::debug;

use crate::cache::{CacheMetadata, ResourceKey};
use crate::error::{PixError, Result};
use crate::mediator::{collect_mediated, MediatedStream};
use crate::models::{Illust, RankingMode, SearchParams};
use crate::PixCache;

/// Resolve a single-value stream into the served copy.
pub(super) async fn single_value<T>(
    key: &ResourceKey,
    stream: MediatedStream<T>,
) -> Result<(CacheMetadata, T)> {
    let (metadata, items) = collect_mediated(stream).await?;
    match (metadata, items.into_iter().next()) {
        (Some(metadata), Some(value)) => Ok((metadata, value)),
        _ => Err(PixError::Other(format!("{} produced no value", key))),
    }
}

impl PixCache {
    // ========================================
    // Illustrations
    // ========================================

    /// One illustration by id.
    pub async fn illust(&self, id: u64, force_fresh: bool) -> Result<(CacheMetadata, Illust)> {
        let key = ResourceKey::illust(id);
        let stream = self.illust_stream(key.clone(), force_fresh).await?;
        single_value(&key, stream).await
    }

    /// Search results, newest cached pages first, extended incrementally.
    ///
    /// Search words are whitespace-normalized, so `"blue  sky"` and
    /// `" blue sky"` share one cache entry.
    pub async fn search(
        &self,
        mut params: SearchParams,
        force_fresh: bool,
    ) -> Result<MediatedStream<Illust>> {
        params.word = params.normalized_word();
        if params.word.is_empty() {
            return Err(PixError::Validation {
                field: "word".to_string(),
                message: "search word is empty".to_string(),
            });
        }
        self.illust_stream(ResourceKey::search(params), force_fresh)
            .await
    }

    /// A user's posted illustrations, extended incrementally.
    pub async fn user_illusts(
        &self,
        user_id: u64,
        force_fresh: bool,
    ) -> Result<MediatedStream<Illust>> {
        self.illust_stream(ResourceKey::user_illusts(user_id), force_fresh)
            .await
    }

    /// A ranking. Replaced wholesale once stale.
    pub async fn ranking(
        &self,
        mode: RankingMode,
        date: Option<NaiveDate>,
        force_fresh: bool,
    ) -> Result<MediatedStream<Illust>> {
        self.illust_stream(ResourceKey::ranking(mode, date), force_fresh)
            .await
    }

    async fn illust_stream(
        &self,
        key: ResourceKey,
        force_fresh: bool,
    ) -> Result<MediatedStream<Illust>> {
        if force_fresh {
            debug!("{}: forcing a fresh fetch", key);
            self.engine.store.invalidate(&key).await?;
        }
        Ok(self.illusts.get(key, force_fresh))
    }
}
