//! Cache mediation algorithms.
//!
//! Each mediator sits between a local store and a remote fetch, decides from
//! the cached metadata whether to serve, resume, revalidate or rebuild, and
//! writes fetched data back as a side effect.
//!
//! | mediator           | shape      | on expiry                         |
//! |--------------------|------------|-----------------------------------|
//! | [`mediate_single`] | one value  | refetch                           |
//! | [`mediate_many`]   | collection | full replace                      |
//! | [`mediate_append`] | collection | verify head, then resume (policy) |
//!
//! The sources they consume are traits ([`SingleSource`],
//! [`CollectionSource`]); [`SingleBinding`] and [`CollectionBinding`]
//! implement them over a [`crate::cache::LocalStore`].

mod append;
mod binding;
mod collection;
mod many;
mod single;
mod source;

pub use append::{mediate_append, RevalidationPolicy};
pub use binding::{CollectionBinding, SingleBinding, SingleFetch};
pub use many::mediate_many;
pub use single::{mediate_single, single_stream};
pub use source::{CachedCollection, CollectionSource, SingleSource};

use crate::cache::CacheMetadata;
use crate::error::Result;
use futures::stream::BoxStream;
use futures::TryStreamExt;

/// Element of a mediated stream: metadata records interleaved with items.
#[derive(Debug, Clone, PartialEq)]
pub enum Mediated<T> {
    Metadata(CacheMetadata),
    Item(T),
}

impl<T> Mediated<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Mediated::Item(item) => Some(item),
            Mediated::Metadata(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&T> {
        match self {
            Mediated::Item(item) => Some(item),
            Mediated::Metadata(_) => None,
        }
    }

    pub fn as_metadata(&self) -> Option<&CacheMetadata> {
        match self {
            Mediated::Metadata(meta) => Some(meta),
            Mediated::Item(_) => None,
        }
    }
}

/// Lazy output of a mediator.
pub type MediatedStream<T> = BoxStream<'static, Result<Mediated<T>>>;

/// Drain a mediated stream into its items and the last metadata seen.
pub async fn collect_mediated<T>(stream: MediatedStream<T>) -> Result<(Option<CacheMetadata>, Vec<T>)> {
    stream
        .try_fold((None, Vec::new()), |(mut meta, mut items), element| async move {
            match element {
                Mediated::Metadata(m) => meta = Some(m),
                Mediated::Item(item) => items.push(item),
            }
            Ok((meta, items))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    #[tokio::test]
    async fn test_collect_mediated_keeps_last_metadata() {
        let first = CacheMetadata::now().with_page_count(Some(0));
        let last = CacheMetadata::now().with_page_count(Some(3));
        let stream = stream::iter(vec![
            Ok(Mediated::Metadata(first)),
            Ok(Mediated::Item(1)),
            Ok(Mediated::Item(2)),
            Ok(Mediated::Metadata(last.clone())),
        ])
        .boxed();

        let (meta, items) = collect_mediated(stream).await.unwrap();
        assert_eq!(meta, Some(last));
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn test_accessors() {
        let item: Mediated<u8> = Mediated::Item(4);
        assert_eq!(item.as_item(), Some(&4));
        assert!(item.as_metadata().is_none());
        assert_eq!(item.into_item(), Some(4));
        assert!(Mediated::<u8>::Metadata(CacheMetadata::now()).into_item().is_none());
    }
}
