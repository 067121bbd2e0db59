//! Area-of-interest resolution
//!
//! Turns one of {explicit geometry, bounding box, center + buffer} into a
//! single longitude/latitude (multi)polygon and its bounding box.

use std::f64::consts::PI;

use clearsky_core::crs::utm;
use clearsky_core::{BBox, Error, Result};
use geo::{Area, BoundingRect, Centroid, LineString, MultiPolygon, Polygon, Rect};
use serde_json::{json, Value};

/// Half-size, in degrees, of the box used for a center point with no buffer.
pub const DEGENERATE_BUFFER_DEG: f64 = 1e-4;

/// Vertices of the circle used for metric buffers.
const CIRCLE_SEGMENTS: usize = 64;

/// Buffer around a center point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AoiBuffer {
    Degrees(f64),
    Meters(f64),
    None,
}

/// Where the AOI comes from. Construct with [`AoiSpec::from_parts`] to get
/// the priority order right.
#[derive(Debug, Clone, PartialEq)]
pub enum AoiSpec {
    Geometry(MultiPolygon<f64>),
    BBox(BBox),
    Center { lon: f64, lat: f64, buffer: AoiBuffer },
}

impl AoiSpec {
    /// Select the AOI source: geometry, else bbox, else center. For a
    /// center, a degree buffer wins over a metre buffer.
    pub fn from_parts(
        geometry: Option<MultiPolygon<f64>>,
        bbox: Option<BBox>,
        center: Option<(f64, f64)>,
        buffer_deg: Option<f64>,
        buffer_m: Option<f64>,
    ) -> Result<Self> {
        if let Some(geometry) = geometry {
            return Ok(Self::Geometry(geometry));
        }
        if let Some(bbox) = bbox {
            return Ok(Self::BBox(bbox));
        }
        let (lon, lat) = center.ok_or_else(|| invalid("none", "one of aoi, bbox or center is required"))?;
        let buffer = match (buffer_deg, buffer_m) {
            (Some(d), _) => AoiBuffer::Degrees(d),
            (None, Some(m)) => AoiBuffer::Meters(m),
            (None, None) => AoiBuffer::None,
        };
        Ok(Self::Center { lon, lat, buffer })
    }
}

/// A resolved area of interest in WGS84 longitude/latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    geometry: MultiPolygon<f64>,
    bbox: BBox,
}

impl Aoi {
    pub fn resolve(spec: &AoiSpec) -> Result<Self> {
        match spec {
            AoiSpec::Geometry(geometry) => Self::from_geometry(geometry.clone()),
            AoiSpec::BBox(b) => {
                if !(b.min_x < b.max_x && b.min_y < b.max_y) {
                    return Err(invalid(
                        &format!("{:?}", b.to_array()),
                        "bbox must be [west, south, east, north] with west < east and south < north",
                    ));
                }
                Self::from_geometry(rectangle(b.min_x, b.min_y, b.max_x, b.max_y).into())
            }
            AoiSpec::Center { lon, lat, buffer } => {
                let (lon, lat) = (*lon, *lat);
                if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
                    return Err(invalid(&format!("({lon}, {lat})"), "center is not a valid lon/lat"));
                }
                let polygon = match *buffer {
                    AoiBuffer::Degrees(d) if d > 0.0 => rectangle(lon - d, lat - d, lon + d, lat + d),
                    AoiBuffer::Meters(m) if m > 0.0 => buffer_meters(lon, lat, m),
                    AoiBuffer::Degrees(d) | AoiBuffer::Meters(d) if d < 0.0 => {
                        return Err(invalid(&d.to_string(), "buffer must not be negative"));
                    }
                    _ => {
                        let e = DEGENERATE_BUFFER_DEG;
                        rectangle(lon - e, lat - e, lon + e, lat + e)
                    }
                };
                Self::from_geometry(polygon.into())
            }
        }
    }

    pub fn from_geometry(geometry: MultiPolygon<f64>) -> Result<Self> {
        let rect = geometry
            .bounding_rect()
            .ok_or_else(|| invalid("empty geometry", "AOI geometry has no coordinates"))?;
        let bbox = BBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
        Ok(Self { geometry, bbox })
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    /// Planar area in square degrees
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Centroid as (lon, lat); falls back to the bbox center for degenerate shapes.
    pub fn centroid(&self) -> (f64, f64) {
        self.geometry
            .centroid()
            .map(|p| (p.x(), p.y()))
            .unwrap_or_else(|| self.bbox.center())
    }

    /// GeoJSON geometry object, `Polygon` when there is a single part.
    pub fn to_geojson(&self) -> Value {
        let polygons: Vec<Value> = self.geometry.0.iter().map(polygon_coords).collect();
        match polygons.as_slice() {
            [single] => json!({ "type": "Polygon", "coordinates": single }),
            _ => json!({ "type": "MultiPolygon", "coordinates": polygons }),
        }
    }
}

fn invalid(value: &str, reason: &str) -> Error {
    Error::InvalidParameter {
        name: "aoi",
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    Rect::new((min_x, min_y), (max_x, max_y)).to_polygon()
}

/// Circle of `meters` radius drawn in the local UTM zone, brought back to
/// lon/lat vertex by vertex.
fn buffer_meters(lon: f64, lat: f64, meters: f64) -> Polygon<f64> {
    let (zone, north) = utm::zone_for_lonlat(lon, lat);
    let (cx, cy) = utm::wgs84_to_utm(lon, lat, zone, north);

    let mut coords: Vec<(f64, f64)> = (0..CIRCLE_SEGMENTS)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / CIRCLE_SEGMENTS as f64;
            utm::utm_to_wgs84(cx + meters * angle.cos(), cy + meters * angle.sin(), zone, north)
        })
        .collect();
    coords.push(coords[0]);

    Polygon::new(LineString::from(coords), vec![])
}

fn polygon_coords(polygon: &Polygon<f64>) -> Value {
    let ring = |ls: &LineString<f64>| -> Vec<[f64; 2]> { ls.coords().map(|c| [c.x, c.y]).collect() };
    let mut rings = vec![ring(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring));
    json!(rings)
}

// ---------------------------------------------------------------------------
// GeoJSON parsing
// ---------------------------------------------------------------------------

/// Parse a GeoJSON `Polygon`, `MultiPolygon`, `Feature` or
/// `FeatureCollection` into one multipolygon.
pub fn geometry_from_geojson(value: &Value) -> Result<MultiPolygon<f64>> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    let coords = value.get("coordinates");
    let polygons = match kind {
        "Feature" => {
            let geometry = value
                .get("geometry")
                .ok_or_else(|| invalid("Feature", "feature has no geometry"))?;
            return geometry_from_geojson(geometry);
        }
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("FeatureCollection", "no features array"))?;
            let mut polygons = Vec::new();
            for feature in features {
                polygons.extend(geometry_from_geojson(feature)?.0);
            }
            polygons
        }
        "Polygon" => vec![coords.and_then(parse_polygon).ok_or_else(|| invalid(kind, "malformed coordinates"))?],
        "MultiPolygon" => coords
            .and_then(Value::as_array)
            .and_then(|parts| parts.iter().map(parse_polygon).collect::<Option<Vec<_>>>())
            .ok_or_else(|| invalid(kind, "malformed coordinates"))?,
        other => return Err(invalid(other, "expected a Polygon or MultiPolygon geometry")),
    };

    if polygons.is_empty() {
        return Err(invalid(kind, "geometry has no polygons"));
    }
    Ok(MultiPolygon(polygons))
}

fn parse_polygon(value: &Value) -> Option<Polygon<f64>> {
    let mut rings = value.as_array()?.iter().map(parse_ring);
    let exterior = rings.next()??;
    let interiors = rings.collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(exterior, interiors))
}

fn parse_ring(value: &Value) -> Option<LineString<f64>> {
    let coords = value
        .as_array()?
        .iter()
        .map(|pos| {
            let pos = pos.as_array()?;
            Some((pos.first()?.as_f64()?, pos.get(1)?.as_f64()?))
        })
        .collect::<Option<Vec<_>>>()?;
    (coords.len() >= 3).then(|| LineString::from(coords))
}
