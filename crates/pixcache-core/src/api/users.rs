//! User record lookups on PixCache.

use tracing::debug;

use super::illusts::single_value;
use crate::cache::{CacheMetadata, ResourceKey};
use crate::error::Result;
use crate::models::UserDetail;
use crate::PixCache;

impl PixCache {
    /// One user's profile record.
    pub async fn user_detail(
        &self,
        user_id: u64,
        force_fresh: bool,
    ) -> Result<(CacheMetadata, UserDetail)> {
        let key = ResourceKey::user_detail(user_id);
        if force_fresh {
            debug!("{}: forcing a fresh fetch", key);
            self.engine.store.invalidate(&key).await?;
        }
        let stream = self.users.get(key.clone(), force_fresh);
        single_value(&key, stream).await
    }
}
