//! STAC catalog search.
//!
//! [`Catalog`] is the seam the event processor searches through;
//! [`StacClient`] implements it against a STAC API `/search` endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::CatalogError;
use crate::geometry::BoundingBox;

/// Items requested per page
pub const PAGE_LIMIT: usize = 100;

/// Pages followed before a search stops
pub const MAX_PAGES: usize = 50;

/// Alternate asset key holding storage-native hrefs
const S3_ALTERNATE: &str = "s3";

/// Property holding scene cloud cover (0-100)
const CLOUD_COVER: &str = "eo:cloud_cover";

/// One asset of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alternate: BTreeMap<String, AlternateAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternateAsset {
    pub href: String,
}

impl Asset {
    /// Href to read from: the `s3` alternate when present.
    #[must_use]
    pub fn read_href(&self) -> &str {
        self.alternate
            .get(S3_ALTERNATE)
            .map_or(self.href.as_str(), |alt| alt.href.as_str())
    }
}

/// A STAC item as returned by search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryItem {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub assets: BTreeMap<String, Asset>,
}

impl ImageryItem {
    /// Acquisition time from `datetime`, falling back to `start_datetime`.
    #[must_use]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        ["datetime", "start_datetime"].iter().find_map(|key| {
            self.properties
                .get(*key)
                .and_then(Value::as_str)
                .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    /// Scene cloud cover, absent for radar collections.
    #[must_use]
    pub fn cloud_cover(&self) -> Option<f64> {
        self.properties.get(CLOUD_COVER).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn asset(&self, band: &str) -> Option<&Asset> {
        self.assets.get(band)
    }

    #[must_use]
    pub fn asset_keys(&self) -> Vec<&str> {
        self.assets.keys().map(String::as_str).collect()
    }
}

/// A catalog search: collections, WGS84 box and a `start/end` date pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub collections: Vec<String>,
    pub bbox: BoundingBox,
    pub datetime: String,
}

/// Something that can be searched for imagery.
pub trait Catalog {
    /// All items matching `request`. An empty result is not an error.
    ///
    /// # Errors
    /// Transport, status or decoding failures.
    fn search(&self, request: &SearchRequest) -> Result<Vec<ImageryItem>, CatalogError>;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn search(&self, request: &SearchRequest) -> Result<Vec<ImageryItem>, CatalogError> {
        (**self).search(request)
    }
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    collections: &'a [String],
    bbox: [f64; 4],
    datetime: String,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ItemCollection {
    #[serde(default)]
    features: Vec<ImageryItem>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Clone, Deserialize)]
struct Link {
    rel: String,
    href: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    /// Overlay `body` on the previous request instead of replacing it
    #[serde(default)]
    merge: bool,
}

/// How to fetch the next page.
#[derive(Debug, Clone, PartialEq)]
enum NextPage {
    Get(String),
    Post { href: String, body: Value },
}

impl ItemCollection {
    /// Next page from the `next` link. POST links without a body repeat
    /// `previous`; `merge: true` overlays the link body on `previous`.
    fn next_page(&self, previous: &Value) -> Option<NextPage> {
        let link = self.links.iter().find(|link| link.rel == "next")?;
        let is_post = link
            .method
            .as_deref()
            .is_some_and(|method| method.eq_ignore_ascii_case("POST"));
        if is_post {
            let body = match (&link.body, link.merge) {
                (None, _) => previous.clone(),
                (Some(body), false) => body.clone(),
                (Some(body), true) => merge_body(previous, body),
            };
            Some(NextPage::Post {
                href: link.href.clone(),
                body,
            })
        } else {
            Some(NextPage::Get(link.href.clone()))
        }
    }
}

/// Shallow merge: top-level keys of `overlay` replace those of `base`.
fn merge_body(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Expand a `YYYY-MM-DD/YYYY-MM-DD` pair to a full-day RFC 3339 interval.
/// Values that already carry a time are passed through.
#[must_use]
pub fn to_rfc3339_interval(datetime: &str) -> String {
    let Some((start, end)) = datetime.split_once('/') else {
        return datetime.to_string();
    };
    let start = if start.len() == 10 {
        format!("{start}T00:00:00Z")
    } else {
        start.to_string()
    };
    let end = if end.len() == 10 {
        format!("{end}T23:59:59Z")
    } else {
        end.to_string()
    };
    format!("{start}/{end}")
}

/// Blocking STAC API client.
pub struct StacClient {
    url: String,
    client: reqwest::blocking::Client,
}

impl StacClient {
    /// Client for the STAC API rooted at `url`.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eventcog/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn fetch(&self, request: reqwest::blocking::RequestBuilder) -> Result<ItemCollection, CatalogError> {
        let response = request.send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            let body: String = text.chars().take(500).collect();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl Catalog for StacClient {
    fn search(&self, request: &SearchRequest) -> Result<Vec<ImageryItem>, CatalogError> {
        let body = serde_json::to_value(SearchBody {
            collections: &request.collections,
            bbox: request.bbox.to_array(),
            datetime: to_rfc3339_interval(&request.datetime),
            limit: PAGE_LIMIT,
        })?;
        debug!(url = %self.url, body = %body, "Searching catalog");

        let mut page = self.fetch(self.client.post(format!("{}/search", self.url)).json(&body))?;
        let mut items = std::mem::take(&mut page.features);
        let mut last_body = body;

        for _ in 1..MAX_PAGES {
            let Some(next) = page.next_page(&last_body) else {
                break;
            };
            page = match next {
                NextPage::Get(href) => self.fetch(self.client.get(href))?,
                NextPage::Post { href, body } => {
                    let fetched = self.fetch(self.client.post(href).json(&body))?;
                    last_body = body;
                    fetched
                }
            };
            if page.features.is_empty() {
                break;
            }
            items.append(&mut page.features);
        }

        info!(
            collections = ?request.collections,
            bbox = %request.bbox,
            datetime = %request.datetime,
            count = items.len(),
            "Catalog search complete"
        );
        Ok(items)
    }
}
