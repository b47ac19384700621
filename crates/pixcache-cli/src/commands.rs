//! Resource subcommands and JSON-lines output.

use anyhow::Result;
use chrono::NaiveDate;
use clap::Subcommand;
use futures::TryStreamExt;
use pixcache_core::{
    Illust, Mediated, MediatedStream, PixCache, RankingMode, ResourceKey, SearchParams, SearchSort,
    SearchTarget,
};
use serde::Serialize;
use std::io::Write;

#[derive(Subcommand, Debug, Clone)]
pub enum ResourceArgs {
    /// One illustration
    Illust { id: u64 },

    /// One user's profile
    User { user_id: u64 },

    /// Illustration search
    Search {
        word: String,
        /// date_desc, date_asc or popular_desc
        #[arg(long, default_value = "date_desc")]
        sort: SearchSort,
        /// partial, exact or title
        #[arg(long, default_value = "partial")]
        target: SearchTarget,
    },

    /// A user's posted illustrations
    UserIllusts { user_id: u64 },

    /// A ranking, optionally for a past date (YYYY-MM-DD)
    Ranking {
        #[arg(default_value = "day")]
        mode: RankingMode,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

impl ResourceArgs {
    pub fn into_key(self) -> ResourceKey {
        match self {
            ResourceArgs::Illust { id } => ResourceKey::illust(id),
            ResourceArgs::User { user_id } => ResourceKey::user_detail(user_id),
            ResourceArgs::Search { word, sort, target } => {
                let mut params = SearchParams::new(word).with_sort(sort).with_target(target);
                params.word = params.normalized_word();
                ResourceKey::search(params)
            }
            ResourceArgs::UserIllusts { user_id } => ResourceKey::user_illusts(user_id),
            ResourceArgs::Ranking { mode, date } => ResourceKey::ranking(mode, date),
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

async fn print_stream(mut stream: MediatedStream<Illust>) -> Result<()> {
    while let Some(element) = stream.try_next().await? {
        match element {
            Mediated::Metadata(metadata) => {
                print_json(&serde_json::json!({ "metadata": metadata }))?
            }
            Mediated::Item(illust) => print_json(&illust)?,
        }
    }
    Ok(())
}

pub async fn read(cache: &PixCache, resource: ResourceArgs, force: bool) -> Result<()> {
    match resource {
        ResourceArgs::Illust { id } => {
            let (metadata, illust) = cache.illust(id, force).await?;
            print_json(&serde_json::json!({ "metadata": metadata, "illust": illust }))
        }
        ResourceArgs::User { user_id } => {
            let (metadata, user) = cache.user_detail(user_id, force).await?;
            print_json(&serde_json::json!({ "metadata": metadata, "user": user }))
        }
        ResourceArgs::Search { word, sort, target } => {
            let params = SearchParams::new(word).with_sort(sort).with_target(target);
            print_stream(cache.search(params, force).await?).await
        }
        ResourceArgs::UserIllusts { user_id } => {
            print_stream(cache.user_illusts(user_id, force).await?).await
        }
        ResourceArgs::Ranking { mode, date } => {
            print_stream(cache.ranking(mode, date, force).await?).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_is_normalized() {
        let args = ResourceArgs::Search {
            word: "  blue   sky ".into(),
            sort: SearchSort::DateDesc,
            target: SearchTarget::PartialMatchForTags,
        };
        assert_eq!(
            args.into_key(),
            ResourceKey::search(SearchParams::new("blue sky"))
        );
    }
}
