//! Satellite scene search against a STAC API.
//!
//! ```text
//!   ChunkJob ──► SearchRequest ──► POST {url}/search ──► ItemCollection
//!                                        ▲                     │
//!                                        └── rel="next" ◄──────┘
//! ```

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::grid::Extent;
use crate::http::{AsyncHttpClient, HttpError};

/// Public Element 84 Earth Search endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://earth-search.aws.element84.com/v1";

/// Sentinel-2 Level-2A collection 1.
pub const DEFAULT_COLLECTION: &str = "sentinel-2-c1-l2a";

/// Page size requested from the catalog.
pub const DEFAULT_SEARCH_LIMIT: usize = 400;

/// Hard stop on pagination in case a server keeps returning `next` links.
pub const MAX_SEARCH_PAGES: usize = 100;

/// Errors from catalog search.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("invalid catalog response: {0}")]
    Parse(String),
}

/// What a chunk needs from the catalog: scenes over a footprint in a date range.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneQuery {
    pub footprint: Extent,
    /// `YYYY-MM-DD/YYYY-MM-DD`
    pub datetime: String,
}

/// A STAC item search body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub intersects: Value,
    pub datetime: String,
    pub collections: Vec<String>,
    pub limit: usize,
}

/// One scene returned by the catalog, reduced to what loading needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub datetime: DateTime<Utc>,
    /// Asset name (`red`, `scl`, ...) to URL.
    pub assets: BTreeMap<String, String>,
    pub cloud_cover: Option<f64>,
}

impl Scene {
    pub fn asset_href(&self, name: &str) -> Option<&str> {
        self.assets.get(name).map(String::as_str)
    }

    /// Local solar date at longitude `lon`: acquisition time shifted by
    /// `lon / 15` hours.
    pub fn solar_day(&self, lon: f64) -> NaiveDate {
        let offset = Duration::seconds((lon / 15.0 * 3600.0).round() as i64);
        (self.datetime + offset).date_naive()
    }
}

/// Searches for scenes intersecting a footprint and time range.
pub trait SceneCatalog: Send + Sync {
    fn search(
        &self,
        query: &SceneQuery,
    ) -> impl Future<Output = Result<Vec<Scene>, CatalogError>> + Send;
}

// =============================================================================
// STAC wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ItemCollection {
    #[serde(default)]
    features: Vec<StacItem>,
    #[serde(default)]
    links: Vec<StacLink>,
}

#[derive(Debug, Deserialize)]
struct StacItem {
    id: String,
    properties: StacProperties,
    #[serde(default)]
    assets: BTreeMap<String, StacAsset>,
}

#[derive(Debug, Deserialize)]
struct StacProperties {
    datetime: Option<DateTime<Utc>>,
    #[serde(rename = "eo:cloud_cover")]
    cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StacAsset {
    href: String,
}

#[derive(Debug, Deserialize)]
struct StacLink {
    rel: String,
    href: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    merge: bool,
}

impl StacItem {
    fn into_scene(self) -> Option<Scene> {
        let Some(datetime) = self.properties.datetime else {
            warn!(id = %self.id, "Skipping scene without datetime");
            return None;
        };
        Some(Scene {
            id: self.id,
            datetime,
            assets: self
                .assets
                .into_iter()
                .map(|(name, asset)| (name, asset.href))
                .collect(),
            cloud_cover: self.properties.cloud_cover,
        })
    }
}

// =============================================================================
// StacCatalog
// =============================================================================

/// STAC API client, generic over the HTTP client for testability.
pub struct StacCatalog<C: AsyncHttpClient> {
    client: C,
    url: String,
    collection: String,
    limit: usize,
    max_pages: usize,
}

impl<C: AsyncHttpClient> StacCatalog<C> {
    pub fn new(client: C, url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            max_pages: MAX_SEARCH_PAGES,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn search_url(&self) -> String {
        format!("{}/search", self.url)
    }

    /// Builds the request for a footprint and `YYYY-MM-DD/YYYY-MM-DD` range.
    pub fn request(&self, intersects: Value, datetime: impl Into<String>) -> SearchRequest {
        SearchRequest {
            intersects,
            datetime: datetime.into(),
            collections: vec![self.collection.clone()],
            limit: self.limit,
        }
    }
}

fn parse_page(bytes: &[u8]) -> Result<ItemCollection, CatalogError> {
    serde_json::from_slice(bytes).map_err(|e| CatalogError::Parse(e.to_string()))
}

/// Where the next page comes from.
enum NextPage {
    Get(String),
    Post(String, Value),
}

fn next_page(links: Vec<StacLink>, previous_body: &Value) -> Option<NextPage> {
    let link = links.into_iter().find(|l| l.rel == "next")?;
    let is_post = link
        .method
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case("POST"));
    if !is_post {
        return Some(NextPage::Get(link.href));
    }

    let body = match (link.body, link.merge) {
        (Some(Value::Object(extra)), true) => {
            let mut merged = previous_body.clone();
            if let Value::Object(map) = &mut merged {
                map.extend(extra);
            }
            merged
        }
        (Some(body), _) => body,
        (None, _) => previous_body.clone(),
    };
    Some(NextPage::Post(link.href, body))
}

impl<C: AsyncHttpClient> SceneCatalog for StacCatalog<C> {
    async fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>, CatalogError> {
        let request = self.request(query.footprint.to_geojson(), query.datetime.as_str());
        let mut body =
            serde_json::to_value(&request).map_err(|e| CatalogError::Parse(e.to_string()))?;
        let mut page = parse_page(&self.client.post_json(&self.search_url(), &body).await?)?;
        let mut scenes = Vec::new();
        let mut pages = 0;

        loop {
            pages += 1;
            let count = page.features.len();
            scenes.extend(page.features.into_iter().filter_map(StacItem::into_scene));
            debug!(page = pages, items = count, "Catalog page received");

            // An empty page ends the search even if the server links onward.
            if count == 0 {
                break;
            }
            let Some(next) = next_page(page.links, &body) else {
                break;
            };
            if pages >= self.max_pages {
                warn!(
                    datetime = %request.datetime,
                    pages = pages,
                    scenes = scenes.len(),
                    "Catalog search truncated at the page limit"
                );
                break;
            }
            page = match next {
                NextPage::Get(href) => parse_page(&self.client.get(&href).await?)?,
                NextPage::Post(href, next_body) => {
                    let bytes = self.client.post_json(&href, &next_body).await?;
                    body = next_body;
                    parse_page(&bytes)?
                }
            };
        }

        debug!(
            datetime = %request.datetime,
            scenes = scenes.len(),
            "Catalog search complete"
        );
        Ok(scenes)
    }
}
