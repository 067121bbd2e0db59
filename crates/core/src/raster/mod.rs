//! Raster data structures and operations

mod bbox;
mod element;
mod geotransform;
mod grid;

pub use bbox::{BBox, PixelWindow};
pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::Raster;
