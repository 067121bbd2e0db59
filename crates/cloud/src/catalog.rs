//! Scene catalog and asset source seams.
//!
//! The pipeline talks to the outside world through two traits:
//! [`SceneCatalog`] answers one space/time/attribute query and
//! [`AssetSource`] materializes one remote asset as a local file. The STAC
//! client and the HTTP downloader are the production implementations;
//! tests plug in fixtures.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use clearsky_algorithms::aoi::geometry_from_geojson;
use geo::MultiPolygon;
use serde_json::Value;

use crate::error::Result;
use crate::stac_models::StacItem;

/// One acquisition returned by a catalog search.
#[derive(Debug, Clone)]
pub struct SceneItem {
    pub id: String,
    pub datetime: Option<DateTime<Utc>>,
    pub cloud_cover: Option<f64>,
    /// Lon/lat footprint; `None` when the catalog geometry did not parse
    pub footprint: Option<MultiPolygon<f64>>,
    /// Physical asset key -> href
    pub assets: BTreeMap<String, String>,
    pub epsg: Option<u32>,
}

impl SceneItem {
    /// Directory-safe form of the identifier.
    pub fn dir_name(&self) -> String {
        safe_filename(&self.id)
    }
}

impl From<StacItem> for SceneItem {
    fn from(item: StacItem) -> Self {
        let epsg = item.epsg();
        let datetime = item
            .properties
            .datetime
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let footprint = item
            .geometry
            .as_ref()
            .and_then(|g| geometry_from_geojson(g).ok());
        Self {
            id: item.id,
            datetime,
            cloud_cover: item.properties.eo_cloud_cover,
            footprint,
            assets: item.assets.into_iter().map(|(k, a)| (k, a.href)).collect(),
            epsg,
        }
    }
}

/// Replace anything but alphanumerics and `-._` with `_`.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || "-._".contains(c) { c } else { '_' })
        .collect()
}

/// One catalog query.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub collection: String,
    /// AOI as a GeoJSON geometry
    pub intersects: Value,
    /// `start/end` interval
    pub datetime: String,
    /// Keep items with `eo:cloud_cover` strictly below this
    pub max_cloud: Option<f64>,
    pub max_items: usize,
}

/// Something that can answer a scene search.
pub trait SceneCatalog: Send + Sync {
    /// Run `query`, returning at most `query.max_items` items in catalog order.
    fn search(&self, query: &SearchQuery) -> impl Future<Output = Result<Vec<SceneItem>>> + Send;
}

/// Something that can materialize a remote asset on local disk.
pub trait AssetSource: Send + Sync {
    /// Write the asset at `href` to `dst`. `dst` must only appear once complete.
    fn fetch(&self, href: &str, dst: &Path) -> impl Future<Output = Result<()>> + Send;
}
