//! Producer wiring: which mediator serves which resource.

use crate::cache::{LocalStore, ResourceKey, ResourceKind};
use crate::config::EngineConfig;
use crate::error::{PixError, Result};
use crate::mediator::{
    mediate_append, mediate_many, single_stream, CollectionBinding, Mediated, MediatedStream,
    SingleBinding, SingleFetch,
};
use crate::models::{Illust, UserDetail};
use crate::network::{ItemFilter, Paginator, RequestThrottle, Upstream};
use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

pub(crate) struct Engine {
    pub store: Arc<dyn LocalStore>,
    pub upstream: Arc<dyn Upstream>,
    pub throttle: Arc<RequestThrottle>,
    pub config: EngineConfig,
    pub filter: Option<ItemFilter<Illust>>,
}

fn failed<T: Send + 'static>(error: PixError) -> MediatedStream<T> {
    stream::once(async move { Err::<Mediated<T>, _>(error) }).boxed()
}

impl Engine {
    /// Producer for every resource that yields illustrations.
    pub fn illust_producer(self: &Arc<Self>, key: &ResourceKey) -> MediatedStream<Illust> {
        let max_age = self.config.max_age(key.kind());
        match key {
            ResourceKey::Illust { id } => {
                let id = *id;
                let engine = self.clone();
                let fetch: SingleFetch<Illust> = Arc::new(move || {
                    let engine = engine.clone();
                    async move {
                        let upstream = &engine.upstream;
                        engine.throttle.call("illust", || upstream.illust(id)).await
                    }
                    .boxed()
                });
                let binding = SingleBinding::new(self.store.clone(), key.clone(), max_age, fetch);
                single_stream(Arc::new(binding))
            }
            ResourceKey::Ranking { .. } => match self.collection(key) {
                Ok(binding) => mediate_many(Arc::new(binding), self.config.fetch_limit(key.kind())),
                Err(e) => failed(e),
            },
            ResourceKey::Search(_) | ResourceKey::UserIllusts { .. } => match self.collection(key) {
                Ok(binding) => mediate_append(
                    Arc::new(binding),
                    self.config.fetch_limit(key.kind()),
                    self.config.revalidation.clone(),
                ),
                Err(e) => failed(e),
            },
            ResourceKey::UserDetail { .. } => failed(PixError::Validation {
                field: "key".into(),
                message: format!("{} does not yield illustrations", key),
            }),
        }
    }

    /// Producer for user records.
    pub fn user_producer(self: &Arc<Self>, key: &ResourceKey) -> MediatedStream<UserDetail> {
        let ResourceKey::UserDetail { user_id } = key else {
            return failed(PixError::Validation {
                field: "key".into(),
                message: format!("{} is not a user record", key),
            });
        };
        let user_id = *user_id;
        let engine = self.clone();
        let fetch: SingleFetch<UserDetail> = Arc::new(move || {
            let engine = engine.clone();
            async move {
                let upstream = &engine.upstream;
                engine
                    .throttle
                    .call("user_detail", || upstream.user_detail(user_id))
                    .await
            }
            .boxed()
        });
        let max_age = self.config.max_age(ResourceKind::UserDetail);
        single_stream(Arc::new(SingleBinding::new(
            self.store.clone(),
            key.clone(),
            max_age,
            fetch,
        )))
    }

    fn collection(&self, key: &ResourceKey) -> Result<CollectionBinding<Illust>> {
        let fetcher = self.upstream.illust_pages(key)?;
        let paginator = Paginator::new(fetcher, self.throttle.clone())
            .with_filter(self.filter.clone())
            .with_label(key.storage_key());
        Ok(CollectionBinding::new(
            self.store.clone(),
            key.clone(),
            self.config.max_age(key.kind()),
            paginator,
        ))
    }

    /// Replay deadline for a shared result: when its data would go stale.
    pub fn replay_deadline<T>(&self, key: &ResourceKey, item: &Mediated<T>) -> Option<DateTime<Utc>> {
        item.as_metadata()
            .map(|meta| meta.expires_at(self.config.max_age(key.kind())))
    }
}
