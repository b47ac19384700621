//! Item filters applied to remote pages before items are yielded.

use crate::models::Illust;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Predicate deciding whether a fetched item is kept.
pub type ItemFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Declarative filter for illustration listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IllustFilter {
    pub min_bookmarks: u32,
    pub min_views: u32,
    /// Tags (original or translated, case-insensitive) that drop an item.
    pub excluded_tags: Vec<String>,
    /// Drop works with a non-zero restrict level.
    pub exclude_restricted: bool,
}

impl IllustFilter {
    /// True when the filter would keep everything.
    pub fn is_noop(&self) -> bool {
        self.min_bookmarks == 0
            && self.min_views == 0
            && self.excluded_tags.is_empty()
            && !self.exclude_restricted
    }

    pub fn matches(&self, illust: &Illust) -> bool {
        if illust.total_bookmarks < self.min_bookmarks as u64 {
            return false;
        }
        if illust.total_view < self.min_views as u64 {
            return false;
        }
        if self.exclude_restricted && illust.is_restricted() {
            return false;
        }
        !self.excluded_tags.iter().any(|tag| illust.has_tag(tag))
    }

    /// `None` when the filter keeps everything.
    pub fn into_predicate(self) -> Option<ItemFilter<Illust>> {
        if self.is_noop() {
            None
        } else {
            Some(Arc::new(move |illust: &Illust| self.matches(illust)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Tag, UserSummary};
    use chrono::Utc;

    fn illust(bookmarks: u64, views: u64, tags: &[&str], x_restrict: u8) -> Illust {
        Illust {
            id: 1,
            title: "t".into(),
            kind: Default::default(),
            user: UserSummary {
                id: 1,
                name: "a".into(),
                account: None,
            },
            tags: tags
                .iter()
                .map(|name| Tag {
                    name: name.to_string(),
                    translated_name: None,
                })
                .collect(),
            total_bookmarks: bookmarks,
            total_view: views,
            page_count: 1,
            create_date: Utc::now(),
            image_urls: Default::default(),
            x_restrict,
        }
    }

    #[test]
    fn test_default_filter_is_noop() {
        assert!(IllustFilter::default().is_noop());
        assert!(IllustFilter::default().into_predicate().is_none());
    }

    #[test]
    fn test_thresholds() {
        let filter = IllustFilter {
            min_bookmarks: 100,
            min_views: 1000,
            ..Default::default()
        };
        assert!(filter.matches(&illust(100, 1000, &[], 0)));
        assert!(!filter.matches(&illust(99, 5000, &[], 0)));
        assert!(!filter.matches(&illust(500, 999, &[], 0)));
    }

    #[test]
    fn test_excluded_tags_and_restricted() {
        let filter = IllustFilter {
            excluded_tags: vec!["AI".into()],
            exclude_restricted: true,
            ..Default::default()
        };
        assert!(!filter.matches(&illust(0, 0, &["ai"], 0)));
        assert!(!filter.matches(&illust(0, 0, &["landscape"], 1)));
        assert!(filter.matches(&illust(0, 0, &["landscape"], 0)));

        let predicate = filter.into_predicate().unwrap();
        assert!(predicate(&illust(0, 0, &["cat"], 0)));
    }
}
