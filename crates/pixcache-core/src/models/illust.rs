//! Illustration and user types as returned by the upstream app API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work behind an illustration id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IllustKind {
    #[default]
    Illust,
    Manga,
    Ugoira,
}

/// A tag attached to an illustration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub translated_name: Option<String>,
}

/// Image URLs for the first page of an illustration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageUrls {
    #[serde(default)]
    pub square_medium: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub large: Option<String>,
}

/// Short author description embedded in illustrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub account: Option<String>,
}

/// An illustration (or manga / ugoira) work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Illust {
    pub id: u64,
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: IllustKind,
    pub user: UserSummary,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub total_bookmarks: u64,
    #[serde(default)]
    pub total_view: u64,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    pub create_date: DateTime<Utc>,
    #[serde(default)]
    pub image_urls: ImageUrls,
    /// 0 for all-ages, 1 for R-18, 2 for R-18G.
    #[serde(default)]
    pub x_restrict: u8,
}

fn default_page_count() -> u32 {
    1
}

impl Illust {
    /// Whether any tag (original or translated) matches `needle`, ignoring case.
    pub fn has_tag(&self, needle: &str) -> bool {
        self.tags.iter().any(|tag| {
            tag.name.eq_ignore_ascii_case(needle)
                || tag
                    .translated_name
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(needle))
        })
    }

    /// Whether the work is age-restricted.
    pub fn is_restricted(&self) -> bool {
        self.x_restrict > 0
    }
}

/// Profile counters for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    #[serde(default)]
    pub total_illusts: u64,
    #[serde(default)]
    pub total_manga: u64,
    #[serde(default)]
    pub total_follow_users: u64,
    #[serde(default)]
    pub webpage: Option<String>,
}

/// Full user record from the user-detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetail {
    pub user: UserSummary,
    #[serde(default)]
    pub profile: UserProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Illust {
        serde_json::from_value(serde_json::json!({
            "id": 101,
            "title": "sunset",
            "type": "manga",
            "user": { "id": 7, "name": "painter" },
            "tags": [
                { "name": "風景", "translated_name": "landscape" },
                { "name": "original" }
            ],
            "total_bookmarks": 1200,
            "total_view": 9000,
            "create_date": "2024-05-01T12:00:00+09:00",
            "x_restrict": 0
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_upstream_shape() {
        let illust = sample();
        assert_eq!(illust.kind, IllustKind::Manga);
        assert_eq!(illust.page_count, 1);
        assert_eq!(illust.create_date.to_rfc3339(), "2024-05-01T03:00:00+00:00");
    }

    #[test]
    fn test_has_tag_matches_translation() {
        let illust = sample();
        assert!(illust.has_tag("Landscape"));
        assert!(illust.has_tag("ORIGINAL"));
        assert!(!illust.has_tag("portrait"));
        assert!(!illust.is_restricted());
    }
}
