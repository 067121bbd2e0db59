//! # clearsky algorithms
//!
//! The pure, I/O-free half of the acquisition pipeline:
//!
//! - **aoi**: resolve geometry / bbox / center + buffer into one lon/lat AOI
//! - **grid**: plan the snapped target grid shared by a run
//! - **warp**: reproject rasters onto that grid (nearest / bilinear)
//! - **bundle**: aligned bands and per-scene bundles
//! - **validity**: valid-pixel percentage and the accept/reject decision
//! - **composite**: SCL-priority `best` and clear-pixel `median` mosaics

pub mod aoi;
pub mod bundle;
pub mod composite;
pub mod grid;
pub mod maybe_rayon;
pub mod validity;
pub mod warp;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::aoi::{geometry_from_geojson, Aoi, AoiBuffer, AoiSpec};
    pub use crate::bundle::{choose_base_band, AlignedBand, BandKind, SceneBundle};
    pub use crate::composite::{
        composite, merge_first_valid, CompositeMethod, CompositeScene, MosaicResult, MEDIAN_NODATA,
    };
    pub use crate::grid::{plan_grid, GridSpec};
    pub use crate::validity::{valid_percentage, GateDecision};
    pub use crate::warp::{warp_to_grid, Resampling};
    pub use clearsky_core::prelude::*;
}
