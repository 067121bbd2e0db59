//! # clearsky core
//!
//! Core types and I/O shared by the clearsky crates:
//! - `Raster<T>`: generic georeferenced grid
//! - `GeoTransform`, `BBox`, `PixelWindow`: georeferencing helpers
//! - `CRS`: EPSG-identified reference systems with WGS84/UTM transforms
//! - GeoTIFF reading (windowed) and atomic writing, band (de)stacking

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{BBox, GeoTransform, PixelWindow, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::{transform_bounds, transform_point, CRS};
    pub use crate::error::{Error, Result};
    pub use crate::raster::{BBox, GeoTransform, PixelWindow, Raster, RasterElement};
}
