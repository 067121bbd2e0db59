//! Async STAC client for searching spatio-temporal asset catalogs.
//!
//! Supports Planetary Computer and Earth Search out of the box, plus
//! arbitrary STAC API endpoints via [`StacCatalog::Custom`].

use std::time::Duration;

use tracing::{debug, info};

use crate::catalog::{SceneCatalog, SceneItem, SearchQuery};
use crate::error::{CloudError, Result};
use crate::http::sign_planetary_computer;
use crate::retry::{Attempt, RetryPolicy};
use crate::stac_models::{StacItem, StacItemCollection, StacLink, StacSearchParams};

/// Largest page size requested from a catalog.
const MAX_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Catalog enum
// ---------------------------------------------------------------------------

/// Well-known STAC catalogs plus custom endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StacCatalog {
    /// Microsoft Planetary Computer STAC API.
    PlanetaryComputer,
    /// AWS Earth Search (Element 84).
    #[default]
    EarthSearch,
    /// Any STAC API root URL, e.g. `"https://my-stac.example.com/api/v1"`.
    Custom(String),
}

impl StacCatalog {
    /// Return the full POST `/search` URL for this catalog.
    pub fn search_url(&self) -> String {
        match self {
            Self::PlanetaryComputer => {
                "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
            }
            Self::EarthSearch => "https://earth-search.aws.element84.com/v1/search".to_string(),
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{}/search", base)
                }
            }
        }
    }

    /// Parse a shorthand string into a catalog.
    ///
    /// Recognized shorthands: `"pc"`, `"planetary-computer"`, `"es"`,
    /// `"earth-search"`. Anything else is treated as a custom URL.
    pub fn from_str_or_url(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pc" | "planetary-computer" | "planetarycomputer" => Self::PlanetaryComputer,
            "es" | "earth-search" | "earthsearch" => Self::EarthSearch,
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Whether asset hrefs need SAS token signing before download.
    pub fn needs_signing(&self) -> bool {
        matches!(self, Self::PlanetaryComputer)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`StacClient`].
#[derive(Debug, Clone)]
pub struct StacClientOptions {
    /// Per-request timeout (default 30 s).
    pub request_timeout: Duration,
    /// Retry policy for transient search failures.
    pub retry: RetryPolicy,
}

impl Default for StacClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Async client for STAC Item Search.
pub struct StacClient {
    catalog: StacCatalog,
    client: reqwest::Client,
    options: StacClientOptions,
}

impl StacClient {
    pub fn new(catalog: StacCatalog, options: StacClientOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| CloudError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            catalog,
            client,
            options,
        })
    }

    pub fn catalog(&self) -> &StacCatalog {
        &self.catalog
    }

    // ── Single-page search ──────────────────────────────────────────

    /// Execute a single search request and return one page of results.
    pub async fn search_page(&self, params: &StacSearchParams) -> Result<StacItemCollection> {
        let url = self.catalog.search_url();
        self.post_search(&url, params).await
    }

    // ── Paginated search ────────────────────────────────────────────

    /// Search with automatic pagination, collecting up to `max_items` items.
    pub async fn search_all(&self, params: &StacSearchParams, max_items: usize) -> Result<Vec<StacItem>> {
        let mut all_items: Vec<StacItem> = Vec::new();
        let mut page = self.search_page(params).await?;

        loop {
            let next = page.next_link().cloned();
            all_items.append(&mut page.features);
            debug!(items = all_items.len(), "STAC page received");

            if all_items.len() >= max_items {
                break;
            }

            match next {
                Some(link) => {
                    page = self.follow_next(&link, params).await?;
                    if page.is_empty() {
                        break;
                    }
                }
                None => break,
            }
        }

        all_items.truncate(max_items);
        Ok(all_items)
    }

    /// Sign an asset href for Planetary Computer; other catalogs return it unchanged.
    pub async fn sign_asset_href(&self, href: &str) -> Result<String> {
        if !self.catalog.needs_signing() {
            return Ok(href.to_string());
        }
        sign_planetary_computer(&self.client, href).await
    }

    // ── Private helpers ─────────────────────────────────────────────

    async fn post_search(&self, url: &str, params: &StacSearchParams) -> Result<StacItemCollection> {
        let attempt = |_: u32| async move {
            let resp = self
                .client
                .post(url)
                .json(params)
                .send()
                .await
                .map_err(|e| Attempt::Retry(format!("STAC search request failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let msg = format!(
                    "STAC search returned HTTP {}: {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
                // Don't retry client errors (4xx)
                return Err(if status.is_client_error() {
                    Attempt::Abort(msg)
                } else {
                    Attempt::Retry(msg)
                });
            }

            let body = resp
                .text()
                .await
                .map_err(|e| Attempt::Retry(format!("reading response body: {e}")))?;
            serde_json::from_str::<StacItemCollection>(&body)
                .map_err(|e| Attempt::Abort(format!("parsing STAC response: {e}")))
        };

        self.options
            .retry
            .run("STAC search", attempt)
            .await
            .map_err(|e| CloudError::Network(e.last))
    }

    /// Follow a pagination link. Handles both POST (body/merge) and GET links.
    async fn follow_next(&self, link: &StacLink, original: &StacSearchParams) -> Result<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();

        if method == "POST" {
            let mut body = serde_json::to_value(original)?;
            match (&link.body, link.merge.unwrap_or(false)) {
                (Some(link_body), true) => {
                    if let (Some(base), Some(overlay)) = (body.as_object_mut(), link_body.as_object()) {
                        for (k, v) in overlay {
                            base.insert(k.clone(), v.clone());
                        }
                    }
                }
                (Some(link_body), false) => body = link_body.clone(),
                (None, _) => {}
            }
            let merged: StacSearchParams = serde_json::from_value(body)?;
            self.post_search(&link.href, &merged).await
        } else {
            let resp = self
                .client
                .get(&link.href)
                .send()
                .await
                .map_err(|e| CloudError::Network(format!("GET pagination: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(CloudError::Network(format!(
                    "STAC pagination returned HTTP {}: {}",
                    status,
                    body.chars().take(500).collect::<String>()
                )));
            }
            Ok(resp.json().await?)
        }
    }
}

/// Request body for one pipeline query.
pub fn search_params(query: &SearchQuery) -> StacSearchParams {
    let mut params = StacSearchParams::new()
        .collections(&[query.collection.as_str()])
        .intersects(query.intersects.clone())
        .datetime(&query.datetime)
        .limit(query.max_items.clamp(1, MAX_PAGE_SIZE) as u32);
    if let Some(lt) = query.max_cloud {
        params = params.cloud_cover_lt(lt);
    }
    params
}

impl SceneCatalog for StacClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SceneItem>> {
        let items = self.search_all(&search_params(query), query.max_items).await?;
        info!(
            catalog = %self.catalog.search_url(),
            collection = %query.collection,
            datetime = %query.datetime,
            found = items.len(),
            "STAC search"
        );
        Ok(items.into_iter().map(SceneItem::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_search_urls() {
        assert_eq!(
            StacCatalog::PlanetaryComputer.search_url(),
            "https://planetarycomputer.microsoft.com/api/stac/v1/search"
        );
        assert_eq!(
            StacCatalog::EarthSearch.search_url(),
            "https://earth-search.aws.element84.com/v1/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://example.com/stac".into()).search_url(),
            "https://example.com/stac/search"
        );
        assert_eq!(
            StacCatalog::Custom("https://example.com/stac/search/".into()).search_url(),
            "https://example.com/stac/search"
        );
    }

    #[test]
    fn catalog_from_str_or_url() {
        assert_eq!(StacCatalog::from_str_or_url("PC"), StacCatalog::PlanetaryComputer);
        assert_eq!(StacCatalog::from_str_or_url("earth-search"), StacCatalog::EarthSearch);
        assert_eq!(
            StacCatalog::from_str_or_url("https://My-Stac.com"),
            StacCatalog::Custom("https://My-Stac.com".into())
        );
        assert!(StacCatalog::PlanetaryComputer.needs_signing());
        assert!(!StacCatalog::EarthSearch.needs_signing());
    }

    #[test]
    fn query_becomes_search_body() {
        let query = SearchQuery {
            collection: "sentinel-2-l2a".into(),
            intersects: json!({"type": "Polygon", "coordinates": []}),
            datetime: "2024-06-01/2024-06-30".into(),
            max_cloud: Some(50.0),
            max_items: 250,
        };
        let body = serde_json::to_value(search_params(&query)).unwrap();
        assert_eq!(body["collections"], json!(["sentinel-2-l2a"]));
        assert_eq!(body["limit"], 100);
        assert_eq!(body["query"]["eo:cloud_cover"]["lt"], 50.0);

        let body = serde_json::to_value(search_params(&SearchQuery { max_cloud: None, ..query })).unwrap();
        assert!(body.get("query").is_none());
    }
}
