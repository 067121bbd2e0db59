//! Coordinate Reference System handling
//!
//! A [`CRS`] is identified by its EPSG code. Point transforms are supported
//! between WGS84 longitude/latitude (EPSG:4326) and any UTM zone
//! (EPSG:326xx / 327xx), which covers the projections satellite tiles ship in.

pub mod utm;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::raster::BBox;

/// EPSG code of WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// EPSG code if known
    epsg: Option<u32>,
    /// WKT representation, kept only for CRSs without an EPSG code
    wkt: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            wkt: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            epsg: None,
            wkt: Some(wkt.into()),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(WGS84_EPSG)
    }

    /// UTM zone CRS
    pub fn utm(zone: u32, north: bool) -> Self {
        Self::from_epsg(utm::epsg_for_zone(zone, north))
    }

    /// Local UTM zone for a longitude/latitude.
    pub fn utm_for_lonlat(lon: f64, lat: f64) -> Self {
        let (zone, north) = utm::zone_for_lonlat(lon, lat);
        Self::utm(zone, north)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        self.epsg == Some(WGS84_EPSG)
    }

    /// UTM zone and hemisphere, if this is a UTM CRS
    pub fn utm_zone(&self) -> Option<(u32, bool)> {
        self.epsg.and_then(utm::parse_utm_epsg)
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }

    fn to_lonlat(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.is_geographic() {
            return Ok((x, y));
        }
        match self.utm_zone() {
            Some((zone, north)) => Ok(utm::utm_to_wgs84(x, y, zone, north)),
            None => Err(Error::UnsupportedCrs(self.identifier())),
        }
    }

    fn from_lonlat(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if self.is_geographic() {
            return Ok((lon, lat));
        }
        match self.utm_zone() {
            Some((zone, north)) => Ok(utm::wgs84_to_utm(lon, lat, zone, north)),
            None => Err(Error::UnsupportedCrs(self.identifier())),
        }
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Transform a single point from `src` to `dst`.
///
/// UTM → UTM transforms go through geographic coordinates.
pub fn transform_point(src: &CRS, dst: &CRS, x: f64, y: f64) -> Result<(f64, f64)> {
    if src.is_equivalent(dst) {
        return Ok((x, y));
    }
    let (lon, lat) = src.to_lonlat(x, y)?;
    dst.from_lonlat(lon, lat)
}

/// Transform a bounding box from `src` to `dst`, returning the envelope.
///
/// Each edge is densified with `densify` intermediate points so the
/// curvature of projected edges is captured.
pub fn transform_bounds(src: &CRS, dst: &CRS, bbox: &BBox, densify: usize) -> Result<BBox> {
    if src.is_equivalent(dst) {
        return Ok(*bbox);
    }

    let steps = densify + 1;
    let mut out: Option<BBox> = None;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = bbox.min_x + t * bbox.width();
        let y = bbox.min_y + t * bbox.height();
        for (px, py) in [
            (x, bbox.min_y),
            (x, bbox.max_y),
            (bbox.min_x, y),
            (bbox.max_x, y),
        ] {
            let (tx, ty) = transform_point(src, dst, px, py)?;
            out = Some(match out {
                Some(b) => b.expand_to(tx, ty),
                None => BBox::new(tx, ty, tx, ty),
            });
        }
    }

    out.ok_or_else(|| Error::Other("empty bounds".into()))
}
