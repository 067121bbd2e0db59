//! Run configuration
//!
//! The YAML document is read into a permissive [`RawConfig`], aliases are
//! folded ([`RawConfig::normalized`]), and the result is validated into an
//! immutable [`RunConfig`]. Nothing downstream looks at raw keys.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use clearsky_algorithms::aoi::{geometry_from_geojson, AoiSpec};
use clearsky_algorithms::composite::CompositeMethod;
use clearsky_core::BBox;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CloudError, Result};
use crate::retry::RetryPolicy;
use crate::stac_client::StacCatalog;

/// Bands fetched when the configuration names none.
pub const DEFAULT_BANDS: [&str; 6] = ["B02", "B03", "B04", "B08", "B11", "SCL"];
pub const DEFAULT_SATELLITE: &str = "Sentinel-2";
pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";
pub const DEFAULT_NAME: &str = "aws_stac";
pub const DEFAULT_MAX_ITEMS: usize = 100;
pub const DEFAULT_RESOLUTION_M: f64 = 10.0;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

/// The configuration document as written, every key optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<Center>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoi: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cloud: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_cover_lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_valid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_res_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_crs_epsg: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RawRetry>,
}

impl RawConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CloudError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    /// Fold the aliases into their canonical keys: `lat`/`lon` into
    /// `center`, `start`/`end` into `datetime`, `max_cloud` into
    /// `cloud_cover_lt`, `bands` into `assets`. Canonical keys win.
    pub fn normalized(mut self) -> Self {
        if self.center.is_none() {
            if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
                self.center = Some(Center { lat, lon });
            }
        }
        if self.datetime.is_none() {
            if let (Some(start), Some(end)) = (&self.start, &self.end) {
                self.datetime = Some(format!("{start}/{end}"));
            }
        }
        if self.cloud_cover_lt.is_none() {
            self.cloud_cover_lt = self.max_cloud;
        }
        if self.assets.is_none() {
            self.assets = self.bands.clone();
        }
        self
    }

    /// Requested bands, either key, falling back to [`DEFAULT_BANDS`].
    pub fn band_list(&self) -> Vec<String> {
        self.assets
            .clone()
            .or_else(|| self.bands.clone())
            .unwrap_or_else(|| DEFAULT_BANDS.iter().map(|b| b.to_string()).collect())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Validated configuration for one acquisition run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub aoi: AoiSpec,
    /// `start/end` interval for the catalog
    pub datetime: String,
    pub max_cloud: Option<f64>,
    /// Logical band names, upper-cased, de-duplicated, in request order
    pub bands: Vec<String>,
    pub min_valid: Option<f64>,
    pub max_items: usize,
    pub target_res_m: f64,
    pub target_crs_epsg: Option<u32>,
    pub satellite: String,
    pub collection: String,
    pub catalog: StacCatalog,
    pub name: String,
    pub composite: Option<CompositeMethod>,
    pub stack: bool,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// The normalized document, written next to the results
    pub source: RawConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_raw(RawConfig::load(path)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::from_raw(RawConfig::from_yaml_str(text)?)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let raw = raw.normalized();

        let geometry = raw
            .aoi
            .as_ref()
            .map(|v| geometry_from_geojson(v).map_err(|e| config(format!("invalid aoi geometry: {e}"))))
            .transpose()?;
        let bbox = raw.bbox.as_deref().map(parse_bbox).transpose()?;
        let center = raw.center.map(|c| (c.lon, c.lat));
        if geometry.is_none() && bbox.is_none() && center.is_none() {
            return Err(config("AOI missing: set one of center, lat/lon, bbox or aoi"));
        }
        let aoi = AoiSpec::from_parts(geometry, bbox, center, raw.buffer, raw.buffer_m)
            .map_err(|e| config(e.to_string()))?;

        let datetime = raw
            .datetime
            .clone()
            .ok_or_else(|| config("date range missing: set start and end, or datetime"))?;
        validate_interval(&datetime)?;

        let bands = normalize_bands(&raw.band_list());
        if bands.is_empty() {
            return Err(config("band list is empty"));
        }

        if let Some(v) = raw.min_valid {
            if !(0.0..=100.0).contains(&v) {
                return Err(config(format!("min_valid must be within 0..=100, got {v}")));
            }
        }
        let target_res_m = raw.target_res_m.unwrap_or(DEFAULT_RESOLUTION_M);
        if !(target_res_m.is_finite() && target_res_m > 0.0) {
            return Err(config(format!("target_res_m must be positive, got {target_res_m}")));
        }
        let max_items = raw.max_items.unwrap_or(DEFAULT_MAX_ITEMS);
        if max_items == 0 {
            return Err(config("max_items must be at least 1"));
        }

        let composite = raw
            .composite
            .as_deref()
            .map(str::parse::<CompositeMethod>)
            .transpose()
            .map_err(|e| config(e.to_string()))?;

        Ok(Self {
            aoi,
            datetime,
            max_cloud: raw.cloud_cover_lt,
            bands,
            min_valid: raw.min_valid,
            max_items,
            target_res_m,
            target_crs_epsg: raw.target_crs_epsg,
            satellite: raw.satellite.clone().unwrap_or_else(|| DEFAULT_SATELLITE.into()),
            collection: raw.collection.clone().unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            catalog: raw
                .catalog
                .as_deref()
                .map(StacCatalog::from_str_or_url)
                .unwrap_or_default(),
            name: raw.name.clone().unwrap_or_else(|| DEFAULT_NAME.into()),
            composite,
            stack: raw.stack.unwrap_or(true) || composite.is_some(),
            concurrency: raw.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            retry: retry_policy(raw.retry.as_ref().cloned().unwrap_or_default())?,
            source: raw,
        })
    }

    /// Override the run name (command line beats the document).
    pub fn with_name(mut self, name: Option<String>) -> Self {
        if let Some(name) = name {
            self.source.name = Some(name.clone());
            self.name = name;
        }
        self
    }

    /// `<output_root>/<satellite>/<name>`
    pub fn run_dir(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.satellite).join(&self.name)
    }
}

fn config(msg: impl Into<String>) -> CloudError {
    CloudError::Config(msg.into())
}

fn parse_bbox(values: &[f64]) -> Result<BBox> {
    match values {
        &[w, s, e, n] if w < e && s < n => Ok(BBox::new(w, s, e, n)),
        _ => Err(config(format!("bbox must be [west, south, east, north], got {values:?}"))),
    }
}

/// Upper-case, drop duplicates, keep order.
fn normalize_bands(bands: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(bands.len());
    for band in bands {
        let band = band.trim().to_ascii_uppercase();
        if !band.is_empty() && !out.contains(&band) {
            out.push(band);
        }
    }
    out
}

fn retry_policy(raw: RawRetry) -> Result<RetryPolicy> {
    let defaults = RetryPolicy::default();
    let policy = RetryPolicy {
        max_attempts: raw.max_attempts.unwrap_or(defaults.max_attempts),
        initial_backoff: raw
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff),
        multiplier: raw.multiplier.unwrap_or(defaults.multiplier),
        max_backoff: raw
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff),
    };
    if policy.max_attempts == 0 {
        return Err(config("retry.max_attempts must be at least 1"));
    }
    if !(policy.multiplier.is_finite() && policy.multiplier >= 1.0) {
        return Err(config(format!("retry.multiplier must be >= 1, got {}", policy.multiplier)));
    }
    Ok(policy)
}

/// Parse one end of an interval; `..` and empty mean open.
fn parse_instant(s: &str) -> Result<Option<NaiveDate>> {
    let s = s.trim();
    if s.is_empty() || s == ".." {
        return Ok(None);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.date_naive()));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| config(format!("unparsable date '{s}'")))
}

fn validate_interval(datetime: &str) -> Result<()> {
    let (start, end) = match datetime.split_once('/') {
        Some((a, b)) => (parse_instant(a)?, parse_instant(b)?),
        None => {
            let single = parse_instant(datetime)?;
            (single, single)
        }
    };
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(config(format!("start {start} is after end {end}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_algorithms::aoi::AoiBuffer;

    #[test]
    fn aliases_and_defaults() {
        let cfg = RunConfig::from_yaml_str(
            "lat: 35.6\nlon: 139.7\nbuffer_m: 500\nstart: 2024-06-01\nend: 2024-06-30\nmax_cloud: 50\nbands: [b04, B08, SCL, b04]\n",
        )
        .unwrap();
        assert_eq!(
            cfg.aoi,
            AoiSpec::Center {
                lon: 139.7,
                lat: 35.6,
                buffer: AoiBuffer::Meters(500.0)
            }
        );
        assert_eq!(cfg.datetime, "2024-06-01/2024-06-30");
        assert_eq!(cfg.max_cloud, Some(50.0));
        assert_eq!(cfg.bands, vec!["B04", "B08", "SCL"]);
        assert_eq!(cfg.max_items, 100);
        assert_eq!(cfg.target_res_m, 10.0);
        assert_eq!(cfg.satellite, "Sentinel-2");
        assert_eq!(cfg.name, "aws_stac");
        assert_eq!(cfg.catalog, StacCatalog::EarthSearch);
        assert!(cfg.stack);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.source.assets.as_deref().map(<[String]>::len), Some(4));
    }

    #[test]
    fn canonical_keys_win_over_aliases() {
        let cfg = RunConfig::from_yaml_str(
            "center: {lat: 1.0, lon: 2.0}\nlat: 9\nlon: 9\ndatetime: 2024-01-01/2024-02-01\nstart: 2023-01-01\nend: 2023-02-01\ncloud_cover_lt: 10\nmax_cloud: 90\n",
        )
        .unwrap();
        assert!(matches!(cfg.aoi, AoiSpec::Center { lon, lat, .. } if lon == 2.0 && lat == 1.0));
        assert_eq!(cfg.datetime, "2024-01-01/2024-02-01");
        assert_eq!(cfg.max_cloud, Some(10.0));
        assert_eq!(cfg.bands.len(), DEFAULT_BANDS.len());
    }

    #[test]
    fn geometry_beats_bbox_beats_center() {
        let cfg = RunConfig::from_yaml_str(
            "bbox: [139.70, 35.60, 139.71, 35.61]\nlat: 0\nlon: 0\ndatetime: 2024-06-01/2024-06-02\n",
        )
        .unwrap();
        assert!(matches!(cfg.aoi, AoiSpec::BBox(_)));

        let cfg = RunConfig::from_yaml_str(
            r#"
aoi:
  type: Polygon
  coordinates: [[[0, 0], [1, 0], [1, 1], [0, 0]]]
bbox: [139.70, 35.60, 139.71, 35.61]
datetime: 2024-06-01/2024-06-02
"#,
        )
        .unwrap();
        assert!(matches!(cfg.aoi, AoiSpec::Geometry(_)));
    }

    #[test]
    fn configuration_errors() {
        let err = |yaml: &str| RunConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err("start: 2024-01-01\nend: 2024-02-01\n"), CloudError::Config(m) if m.contains("AOI")));
        assert!(matches!(err("lat: 1\nlon: 2\n"), CloudError::Config(m) if m.contains("date range")));
        assert!(matches!(err("lat: 1\nlon: 2\nstart: 2024-03-01\nend: 2024-02-01\n"), CloudError::Config(_)));
        assert!(matches!(err("lat: 1\nlon: 2\ndatetime: 2024-01-01/..\nmin_valid: 120\n"), CloudError::Config(_)));
        assert!(matches!(err("lat: 1\nlon: 2\ndatetime: 2024-01-01/..\ntarget_res_m: 0\n"), CloudError::Config(_)));
        assert!(matches!(err("lat: 1\nlon: 2\ndatetime: 2024-01-01/..\nbands: []\n"), CloudError::Config(_)));
        assert!(matches!(err("bbox: [1, 2, 3]\ndatetime: 2024-01-01/..\n"), CloudError::Config(_)));
        assert!(matches!(err("lat: 1\nlon: 2\ndatetime: 2024-01-01/..\ncomposite: mean\n"), CloudError::Config(_)));
    }

    #[test]
    fn run_dir_and_name_override() {
        let cfg = RunConfig::from_yaml_str("lat: 1\nlon: 2\ndatetime: 2024-01-01T00:00:00Z/2024-01-02T00:00:00Z\nname: tokyo\n")
            .unwrap()
            .with_name(Some("override".into()));
        assert_eq!(cfg.run_dir(Path::new("data")), PathBuf::from("data/Sentinel-2/override"));
        assert_eq!(cfg.source.name.as_deref(), Some("override"));
    }

    #[test]
    fn composite_forces_stack_and_retry_section() {
        let cfg = RunConfig::from_yaml_str(
            "lat: 1\nlon: 2\ndatetime: 2024-01-01/2024-01-31\ncomposite: median\nstack: false\ncatalog: pc\nretry:\n  max_attempts: 5\n  initial_backoff_ms: 100\n",
        )
        .unwrap();
        assert_eq!(cfg.composite, Some(CompositeMethod::Median));
        assert!(cfg.stack);
        assert_eq!(cfg.catalog, StacCatalog::PlanetaryComputer);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(cfg.retry.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn normalized_document_round_trips() {
        let raw = RawConfig::from_yaml_str("lat: 1\nlon: 2\nstart: 2024-01-01\nend: 2024-01-31\nbands: [B04, SCL]\n")
            .unwrap()
            .normalized();
        let back = RawConfig::from_yaml_str(&raw.to_yaml().unwrap()).unwrap();
        assert_eq!(back.band_list(), vec!["B04", "SCL"]);
        assert_eq!(back.datetime.as_deref(), Some("2024-01-01/2024-01-31"));
    }
}
