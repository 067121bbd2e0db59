//! Footprint/AOI overlap pre-filter
//!
//! Runs on search metadata only, so candidates that cannot cover the AOI
//! are dropped before a single byte is downloaded.

use clearsky_algorithms::aoi::Aoi;
use geo::{Area, BooleanOps, CoordsIter, MultiPolygon};
use tracing::{debug, info};

use crate::catalog::SceneItem;

/// `100 * area(footprint ∩ aoi) / area(aoi)`. Missing, empty or
/// non-finite geometries give 0.
pub fn overlap_percentage(footprint: Option<&MultiPolygon<f64>>, aoi: &Aoi) -> f64 {
    let Some(footprint) = footprint else { return 0.0 };
    let aoi_area = aoi.area();
    if !usable(footprint) || !usable(aoi.geometry()) || aoi_area <= 0.0 {
        return 0.0;
    }
    let inter = footprint.intersection(aoi.geometry()).unsigned_area();
    if inter <= 0.0 {
        return 0.0;
    }
    (inter / aoi_area * 100.0).min(100.0)
}

fn usable(geometry: &MultiPolygon<f64>) -> bool {
    geometry.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite()) && geometry.unsigned_area() > 0.0
}

/// Keep items whose overlap is at least `min_overlap` percent.
/// Without a threshold every item is kept.
pub fn prefilter(items: Vec<SceneItem>, aoi: &Aoi, min_overlap: Option<f64>) -> Vec<SceneItem> {
    let Some(min) = min_overlap else { return items };
    let before = items.len();
    let kept: Vec<SceneItem> = items
        .into_iter()
        .filter(|item| {
            let pct = overlap_percentage(item.footprint.as_ref(), aoi);
            debug!(scene = %item.id, overlap_pct = pct, "footprint overlap");
            pct >= min
        })
        .collect();
    info!(kept = kept.len(), before, min_valid = min, "pre-filtered by AOI overlap");
    kept
}
