//! Resource keys identifying one independently cacheable upstream resource.

use crate::models::{RankingMode, SearchParams};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Coarse resource category, used to pick per-kind policies such as max age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Illust,
    UserDetail,
    Search,
    UserIllusts,
    Ranking,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Illust => "illust",
            ResourceKind::UserDetail => "user",
            ResourceKind::Search => "search",
            ResourceKind::UserIllusts => "user_illusts",
            ResourceKind::Ranking => "ranking",
        }
    }
}

/// Identifier of one cacheable resource: its kind plus request parameters.
///
/// Keys are immutable values; [`ResourceKey::storage_key`] gives the stable
/// string form stores use as their primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKey {
    Illust {
        id: u64,
    },
    UserDetail {
        user_id: u64,
    },
    Search(SearchParams),
    UserIllusts {
        user_id: u64,
    },
    Ranking {
        mode: RankingMode,
        #[serde(default)]
        date: Option<NaiveDate>,
    },
}

impl ResourceKey {
    pub fn illust(id: u64) -> Self {
        ResourceKey::Illust { id }
    }

    pub fn user_detail(user_id: u64) -> Self {
        ResourceKey::UserDetail { user_id }
    }

    pub fn search(params: SearchParams) -> Self {
        ResourceKey::Search(params)
    }

    pub fn user_illusts(user_id: u64) -> Self {
        ResourceKey::UserIllusts { user_id }
    }

    pub fn ranking(mode: RankingMode, date: Option<NaiveDate>) -> Self {
        ResourceKey::Ranking { mode, date }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceKey::Illust { .. } => ResourceKind::Illust,
            ResourceKey::UserDetail { .. } => ResourceKind::UserDetail,
            ResourceKey::Search(_) => ResourceKind::Search,
            ResourceKey::UserIllusts { .. } => ResourceKind::UserIllusts,
            ResourceKey::Ranking { .. } => ResourceKind::Ranking,
        }
    }

    /// Stable string form, e.g. `search:exact_match_for_tags:date_desc:blue%20sky`.
    pub fn storage_key(&self) -> String {
        match self {
            ResourceKey::Illust { id } => format!("illust:{}", id),
            ResourceKey::UserDetail { user_id } => format!("user:{}", user_id),
            ResourceKey::Search(params) => format!(
                "search:{}:{}:{}",
                params.target.as_str(),
                params.sort.as_str(),
                urlencoding::encode(&params.normalized_word())
            ),
            ResourceKey::UserIllusts { user_id } => format!("user_illusts:{}", user_id),
            ResourceKey::Ranking { mode, date: None } => format!("ranking:{}", mode.as_str()),
            ResourceKey::Ranking {
                mode,
                date: Some(date),
            } => format!("ranking:{}:{}", mode.as_str(), date.format("%Y-%m-%d")),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchSort, SearchTarget};

    #[test]
    fn test_storage_keys() {
        assert_eq!(ResourceKey::illust(42).storage_key(), "illust:42");
        assert_eq!(ResourceKey::user_detail(7).storage_key(), "user:7");
        assert_eq!(
            ResourceKey::ranking(RankingMode::Week, None).storage_key(),
            "ranking:week"
        );
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            ResourceKey::ranking(RankingMode::Day, Some(date)).to_string(),
            "ranking:day:2024-05-01"
        );
    }

    #[test]
    fn test_search_key_is_whitespace_insensitive() {
        let a = ResourceKey::search(
            SearchParams::new("blue  sky").with_target(SearchTarget::ExactMatchForTags),
        );
        let b = ResourceKey::search(
            SearchParams::new(" blue sky").with_target(SearchTarget::ExactMatchForTags),
        );
        assert_eq!(a.storage_key(), b.storage_key());
        assert_eq!(
            a.storage_key(),
            "search:exact_match_for_tags:date_desc:blue%20sky"
        );

        let popular = ResourceKey::search(
            SearchParams::new("blue sky")
                .with_target(SearchTarget::ExactMatchForTags)
                .with_sort(SearchSort::PopularDesc),
        );
        assert_ne!(a.storage_key(), popular.storage_key());
    }

    #[test]
    fn test_kind() {
        assert_eq!(ResourceKey::user_illusts(1).kind(), ResourceKind::UserIllusts);
        assert_eq!(
            ResourceKey::search(SearchParams::new("cat")).kind().as_str(),
            "search"
        );
    }
}
