//! Request parameter types for the collection endpoints.

use serde::{Deserialize, Serialize};

/// Ordering of search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    #[default]
    DateDesc,
    DateAsc,
    PopularDesc,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::DateDesc => "date_desc",
            SearchSort::DateAsc => "date_asc",
            SearchSort::PopularDesc => "popular_desc",
        }
    }
}

impl std::str::FromStr for SearchSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "date_desc" | "new" => Ok(SearchSort::DateDesc),
            "date_asc" | "old" => Ok(SearchSort::DateAsc),
            "popular_desc" | "popular" => Ok(SearchSort::PopularDesc),
            other => Err(format!("unknown search sort: {}", other)),
        }
    }
}

/// Which fields the search word is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchTarget {
    #[default]
    PartialMatchForTags,
    ExactMatchForTags,
    TitleAndCaption,
}

impl SearchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTarget::PartialMatchForTags => "partial_match_for_tags",
            SearchTarget::ExactMatchForTags => "exact_match_for_tags",
            SearchTarget::TitleAndCaption => "title_and_caption",
        }
    }
}

impl std::str::FromStr for SearchTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "partial_match_for_tags" | "partial" => Ok(SearchTarget::PartialMatchForTags),
            "exact_match_for_tags" | "exact" => Ok(SearchTarget::ExactMatchForTags),
            "title_and_caption" | "title" => Ok(SearchTarget::TitleAndCaption),
            other => Err(format!("unknown search target: {}", other)),
        }
    }
}

/// Parameters of an illustration search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchParams {
    pub word: String,
    #[serde(default)]
    pub sort: SearchSort,
    #[serde(default)]
    pub target: SearchTarget,
}

impl SearchParams {
    pub fn new(word: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            sort: SearchSort::default(),
            target: SearchTarget::default(),
        }
    }

    pub fn with_sort(mut self, sort: SearchSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_target(mut self, target: SearchTarget) -> Self {
        self.target = target;
        self
    }

    /// Search word with surrounding whitespace trimmed and inner runs collapsed.
    ///
    /// Two searches that differ only in spacing share one cache record.
    pub fn normalized_word(&self) -> String {
        self.word.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Ranking period and audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    #[default]
    Day,
    Week,
    Month,
    DayMale,
    DayFemale,
    WeekOriginal,
    WeekRookie,
    DayManga,
}

impl RankingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMode::Day => "day",
            RankingMode::Week => "week",
            RankingMode::Month => "month",
            RankingMode::DayMale => "day_male",
            RankingMode::DayFemale => "day_female",
            RankingMode::WeekOriginal => "week_original",
            RankingMode::WeekRookie => "week_rookie",
            RankingMode::DayManga => "day_manga",
        }
    }
}

impl std::str::FromStr for RankingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" | "daily" => Ok(RankingMode::Day),
            "week" | "weekly" => Ok(RankingMode::Week),
            "month" | "monthly" => Ok(RankingMode::Month),
            "day_male" => Ok(RankingMode::DayMale),
            "day_female" => Ok(RankingMode::DayFemale),
            "week_original" => Ok(RankingMode::WeekOriginal),
            "week_rookie" => Ok(RankingMode::WeekRookie),
            "day_manga" => Ok(RankingMode::DayManga),
            other => Err(format!("unknown ranking mode: {}", other)),
        }
    }
}

impl std::fmt::Display for RankingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_mode_roundtrip() {
        for mode in [
            RankingMode::Day,
            RankingMode::Week,
            RankingMode::Month,
            RankingMode::DayMale,
            RankingMode::DayFemale,
            RankingMode::WeekOriginal,
            RankingMode::WeekRookie,
            RankingMode::DayManga,
        ] {
            let parsed: RankingMode = mode.as_str().parse().expect("Should parse");
            assert_eq!(mode, parsed);
        }
        assert!("hourly".parse::<RankingMode>().is_err());
    }

    #[test]
    fn test_normalized_word() {
        let params = SearchParams::new("  blue   sky ");
        assert_eq!(params.normalized_word(), "blue sky");
    }

    #[test]
    fn test_sort_aliases() {
        assert_eq!("popular".parse::<SearchSort>(), Ok(SearchSort::PopularDesc));
        assert_eq!("exact".parse::<SearchTarget>(), Ok(SearchTarget::ExactMatchForTags));
    }
}
