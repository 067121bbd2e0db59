//! STAC (SpatioTemporal Asset Catalog) data types.
//!
//! Serde models for STAC Item Search (`POST /search`): the request body
//! with `intersects` and an `eo:cloud_cover` query, and the subset of the
//! response the pipeline consumes (ids, datetimes, cloud cover, footprints,
//! assets and `next` links).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Search request
// ---------------------------------------------------------------------------

/// Body for `POST /search` (STAC API – Item Search).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    /// GeoJSON geometry the items must intersect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersects: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    /// Query extension filter, e.g. `{"eo:cloud_cover": {"lt": 50}}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Pagination token (next page).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StacSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collections(mut self, cols: &[&str]) -> Self {
        self.collections = Some(cols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Restrict to items intersecting a GeoJSON geometry.
    pub fn intersects(mut self, geometry: Value) -> Self {
        self.intersects = Some(geometry);
        self
    }

    /// Set the bounding box `[west, south, east, north]`.
    pub fn bbox(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.bbox = Some(vec![west, south, east, north]);
        self
    }

    /// Set datetime or datetime range (e.g. `"2024-06-01/2024-06-30"`).
    pub fn datetime(mut self, dt: &str) -> Self {
        self.datetime = Some(dt.to_string());
        self
    }

    /// Keep only items whose `eo:cloud_cover` is strictly below `lt`.
    pub fn cloud_cover_lt(mut self, lt: f64) -> Self {
        self.query = Some(json!({ "eo:cloud_cover": { "lt": lt } }));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A STAC Item Collection (GeoJSON FeatureCollection).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(rename = "type")]
    pub type_: String,

    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,

    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<u64>,

    #[serde(rename = "numberReturned", skip_serializing_if = "Option::is_none")]
    pub number_returned: Option<u64>,
}

impl StacItemCollection {
    /// Find the `"next"` pagination link, if any.
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A single STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItem {
    #[serde(rename = "type", default)]
    pub type_: String,

    pub id: String,

    /// Footprint as raw GeoJSON; parsed on conversion to a scene.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl StacItem {
    pub fn asset(&self, key: &str) -> Option<&StacAsset> {
        self.assets.get(key)
    }

    /// EPSG code from the projection extension (`proj:epsg`, or the newer
    /// `proj:code` of the form `"EPSG:32654"`).
    pub fn epsg(&self) -> Option<u32> {
        let extra = &self.properties.extra;
        if let Some(code) = extra.get("proj:epsg").and_then(Value::as_u64) {
            return u32::try_from(code).ok();
        }
        extra
            .get("proj:code")
            .and_then(Value::as_str)
            .and_then(|s| s.strip_prefix("EPSG:"))
            .and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemProperties {
    /// ISO 8601 datetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    /// Cloud cover percentage (EO extension).
    #[serde(rename = "eo:cloud_cover", skip_serializing_if = "Option::is_none")]
    pub eo_cloud_cover: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A single STAC Asset (file reference).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacAsset {
    pub href: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// A STAC Link (used for pagination).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    /// Relationship: `"self"`, `"root"`, `"next"`, `"prev"`, etc.
    pub rel: String,

    pub href: String,

    /// HTTP method for the link (default GET, but `"next"` often uses POST).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Request body for POST-based pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// If true, merge `body` into the previous request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "id": "S2A_54SUE_20240615_0_L2A",
      "geometry": {
        "type": "Polygon",
        "coordinates": [[[139.0, 35.0], [140.2, 35.0], [140.2, 36.0], [139.0, 36.0], [139.0, 35.0]]]
      },
      "bbox": [139.0, 35.0, 140.2, 36.0],
      "properties": {
        "datetime": "2024-06-15T01:36:21Z",
        "eo:cloud_cover": 5.2,
        "platform": "sentinel-2a",
        "proj:epsg": 32654
      },
      "assets": {
        "red": {
          "href": "https://example.com/B04.tif",
          "type": "image/tiff; application=geotiff; profile=cloud-optimized",
          "roles": ["data"]
        },
        "scl": {
          "href": "https://example.com/SCL.tif",
          "type": "image/tiff; application=geotiff; profile=cloud-optimized",
          "roles": ["data"]
        }
      },
      "collection": "sentinel-2-l2a"
    }
  ],
  "links": [
    {
      "rel": "next",
      "href": "https://earth-search.aws.element84.com/v1/search",
      "method": "POST",
      "body": {"token": "abc123"},
      "merge": true
    },
    {
      "rel": "self",
      "href": "https://earth-search.aws.element84.com/v1/search"
    }
  ],
  "numberMatched": 42,
  "numberReturned": 1
}"#;

    #[test]
    fn parse_item_collection() {
        let col: StacItemCollection = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(col.type_, "FeatureCollection");
        assert_eq!(col.len(), 1);
        assert_eq!(col.number_matched, Some(42));

        let item = &col.features[0];
        assert_eq!(item.collection.as_deref(), Some("sentinel-2-l2a"));
        assert_eq!(item.properties.eo_cloud_cover, Some(5.2));
        assert_eq!(item.asset("red").unwrap().href, "https://example.com/B04.tif");
        assert!(item.asset("nir").is_none());
        assert_eq!(item.epsg(), Some(32654));
    }

    #[test]
    fn epsg_from_proj_code() {
        let mut col: StacItemCollection = serde_json::from_str(FIXTURE).unwrap();
        let item = &mut col.features[0];
        item.properties.extra.remove("proj:epsg");
        item.properties
            .extra
            .insert("proj:code".into(), Value::String("EPSG:32754".into()));
        assert_eq!(item.epsg(), Some(32754));
    }

    #[test]
    fn pagination_links() {
        let col: StacItemCollection = serde_json::from_str(FIXTURE).unwrap();
        let next = col.next_link().unwrap();
        assert_eq!(next.method.as_deref(), Some("POST"));
        assert_eq!(next.merge, Some(true));
        assert_eq!(next.body.as_ref().unwrap()["token"], "abc123");
    }

    #[test]
    fn builder_serializes_correctly() {
        let aoi = json!({"type": "Polygon", "coordinates": [[[139.7, 35.6], [139.71, 35.6], [139.71, 35.61], [139.7, 35.6]]]});
        let params = StacSearchParams::new()
            .collections(&["sentinel-2-l2a"])
            .intersects(aoi.clone())
            .datetime("2024-06-01/2024-06-30")
            .cloud_cover_lt(50.0)
            .limit(5);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["collections"], json!(["sentinel-2-l2a"]));
        assert_eq!(json["intersects"], aoi);
        assert_eq!(json["datetime"], "2024-06-01/2024-06-30");
        assert_eq!(json["query"]["eo:cloud_cover"]["lt"], 50.0);
        assert_eq!(json["limit"], 5);
        assert!(json.get("bbox").is_none());
        assert!(json.get("token").is_none());
    }

    #[test]
    fn empty_params_has_no_fields() {
        let json = serde_json::to_value(StacSearchParams::new()).unwrap();
        assert!(json.as_object().unwrap().is_empty());
    }
}
