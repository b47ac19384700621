//! HTTP implementations of the upstream seams.
//!
//! The app API pages its listings with a `next_url` field; that URL is used
//! verbatim as the [`Cursor`] for the following page.

use super::client::ApiClient;
use super::paginator::{Page, PageFetcher};
use super::Upstream;
use crate::cache::{Cursor, ResourceKey};
use crate::error::{PixError, Result};
use crate::models::{Illust, UserDetail};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

const NEXT_URL_FIELD: &str = "next_url";
const PLATFORM_FILTER: &str = "for_android";

/// Fetches one listing page per call over HTTP.
pub struct HttpPageFetcher<T> {
    client: Arc<ApiClient>,
    first_page: String,
    items_field: &'static str,
    _item: PhantomData<fn() -> T>,
}

impl<T> HttpPageFetcher<T> {
    /// `first_page` is the absolute URL of page one; `items_field` names the
    /// array holding the page's items.
    pub fn new(client: Arc<ApiClient>, first_page: String, items_field: &'static str) -> Self {
        Self {
            client,
            first_page,
            items_field,
            _item: PhantomData,
        }
    }

    pub fn first_page(&self) -> &str {
        &self.first_page
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> PageFetcher<T> for HttpPageFetcher<T> {
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page<T>> {
        let url = cursor.map_or(self.first_page.as_str(), Cursor::as_str);
        let body = self.client.get_json(url).await?;
        parse_page(body, self.items_field)
    }
}

/// Split a listing response into items and the next-page cursor.
pub fn parse_page<T: DeserializeOwned>(mut body: Value, items_field: &str) -> Result<Page<T>> {
    let items = match body.get_mut(items_field) {
        Some(items) => serde_json::from_value(items.take())?,
        None => {
            return Err(PixError::Upstream {
                status: 200,
                message: format!("response has no `{}` field", items_field),
            })
        }
    };
    let next = body
        .get(NEXT_URL_FIELD)
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(Cursor::new);
    Ok(Page::new(items, next))
}

fn take_field<T: DeserializeOwned>(mut body: Value, field: &str) -> Result<T> {
    match body.get_mut(field) {
        Some(value) => Ok(serde_json::from_value(value.take())?),
        None => Err(PixError::Upstream {
            status: 200,
            message: format!("response has no `{}` field", field),
        }),
    }
}

/// [`Upstream`] backed by the app API.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Arc<ApiClient>,
}

impl HttpUpstream {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// First-page URL for a collection key.
    pub fn listing_url(&self, key: &ResourceKey) -> Result<String> {
        let filter = ("filter", PLATFORM_FILTER.to_string());
        match key {
            ResourceKey::Search(params) => self.client.endpoint(
                "/v1/search/illust",
                &[
                    ("word", params.normalized_word()),
                    ("search_target", params.target.as_str().to_string()),
                    ("sort", params.sort.as_str().to_string()),
                    filter,
                ],
            ),
            ResourceKey::UserIllusts { user_id } => self.client.endpoint(
                "/v1/user/illusts",
                &[
                    ("user_id", user_id.to_string()),
                    ("type", "illust".to_string()),
                    filter,
                ],
            ),
            ResourceKey::Ranking { mode, date } => {
                let mut query = vec![("mode", mode.as_str().to_string()), filter];
                if let Some(date) = date {
                    query.push(("date", date.format("%Y-%m-%d").to_string()));
                }
                self.client.endpoint("/v1/illust/ranking", &query)
            }
            ResourceKey::Illust { .. } | ResourceKey::UserDetail { .. } => {
                Err(PixError::Validation {
                    field: "key".into(),
                    message: format!("{} is not a listing", key),
                })
            }
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn illust(&self, id: u64) -> Result<Illust> {
        let url = self
            .client
            .endpoint("/v1/illust/detail", &[("illust_id", id.to_string())])?;
        take_field(self.client.get_json(&url).await?, "illust")
    }

    async fn user_detail(&self, user_id: u64) -> Result<UserDetail> {
        let url = self.client.endpoint(
            "/v1/user/detail",
            &[
                ("user_id", user_id.to_string()),
                ("filter", PLATFORM_FILTER.to_string()),
            ],
        )?;
        Ok(serde_json::from_value(self.client.get_json(&url).await?)?)
    }

    fn illust_pages(&self, key: &ResourceKey) -> Result<Arc<dyn PageFetcher<Illust>>> {
        let first_page = self.listing_url(key)?;
        Ok(Arc::new(HttpPageFetcher::new(
            self.client.clone(),
            first_page,
            "illusts",
        )))
    }
}
