//! Target grid planning
//!
//! One [`GridSpec`] is planned per run and shared read-only by every
//! alignment. Origins are snapped to multiples of the pixel size, so two
//! grids planned for the same AOI and resolution are pixel-identical.

use clearsky_core::crs::transform_bounds;
use clearsky_core::{BBox, Error, GeoTransform, Raster, RasterElement, Result, CRS};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aoi::Aoi;

/// Edge densification used when projecting the AOI bounds.
const BOUNDS_DENSIFY: usize = 21;

/// Deterministic north-up target grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub epsg: u32,
    pub pixel_size: f64,
    /// Top-left corner, a multiple of `pixel_size`
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn crs(&self) -> CRS {
        CRS::from_epsg(self.epsg)
    }

    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::new(self.origin_x, self.origin_y, self.pixel_size, -self.pixel_size)
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn bounds(&self) -> BBox {
        self.geo_transform().bounds(self.width, self.height)
    }

    /// A raster on this grid filled with `fill`.
    pub fn raster<T: RasterElement>(&self, fill: T) -> Raster<T> {
        let mut raster = Raster::filled(self.height, self.width, fill);
        raster.set_transform(self.geo_transform());
        raster.set_crs(Some(self.crs()));
        raster
    }

    /// Fail with [`Error::GridMismatch`] unless `raster` sits exactly on this grid.
    pub fn check_raster<T: RasterElement>(&self, raster: &Raster<T>) -> Result<()> {
        if raster.shape() != self.shape() {
            return Err(Error::GridMismatch(format!(
                "shape {:?} differs from grid {:?}",
                raster.shape(),
                self.shape()
            )));
        }
        match raster.crs().and_then(|c| c.epsg()) {
            Some(epsg) if epsg == self.epsg => {}
            other => {
                return Err(Error::GridMismatch(format!(
                    "CRS {:?} differs from grid EPSG:{}",
                    other, self.epsg
                )))
            }
        }
        let tol = self.pixel_size * 1e-6;
        if !raster.transform().approx_eq(&self.geo_transform(), tol) {
            return Err(Error::GridMismatch(format!(
                "transform {:?} differs from grid {:?}",
                raster.transform(),
                self.geo_transform()
            )));
        }
        Ok(())
    }
}

/// Plan the target grid for `aoi`.
///
/// Without `target_epsg` the UTM zone of the AOI centroid is used. The
/// projected bounds have min-x snapped down and max-y snapped up to a
/// multiple of `pixel_size`; width and height are ceiling-divided.
pub fn plan_grid(aoi: &Aoi, pixel_size: f64, target_epsg: Option<u32>) -> Result<GridSpec> {
    if !(pixel_size.is_finite() && pixel_size > 0.0) {
        return Err(Error::InvalidParameter {
            name: "target_res_m",
            value: pixel_size.to_string(),
            reason: "pixel size must be positive".into(),
        });
    }

    let crs = match target_epsg {
        Some(code) => CRS::from_epsg(code),
        None => {
            let (lon, lat) = aoi.centroid();
            CRS::utm_for_lonlat(lon, lat)
        }
    };
    let epsg = crs.epsg().ok_or_else(|| Error::UnsupportedCrs(crs.identifier()))?;

    let b = transform_bounds(&CRS::wgs84(), &crs, &aoi.bbox(), BOUNDS_DENSIFY)?;
    let origin_x = (b.min_x / pixel_size).floor() * pixel_size;
    let origin_y = (b.max_y / pixel_size).ceil() * pixel_size;
    let width = (((b.max_x - origin_x) / pixel_size).ceil() as usize).max(1);
    let height = (((origin_y - b.min_y) / pixel_size).ceil() as usize).max(1);

    let grid = GridSpec {
        epsg,
        pixel_size,
        origin_x,
        origin_y,
        width,
        height,
    };
    debug!(epsg, width, height, origin_x, origin_y, "planned grid");
    Ok(grid)
}
