//! Cloud-aware compositing of aligned scenes
//!
//! All inputs already share one grid; compositing never reprojects.
//!
//! - **best**: per pixel, the scene(s) with the lowest SCL priority class
//!   win. A single winner is copied verbatim; ties are blended with weights
//!   `max(1 - cloud_fraction, 0)`, renormalized, equal when all are zero.
//! - **median**: per pixel and band, the median over scenes whose priority
//!   class is clear. Pixels with no clear scene get [`MEDIAN_NODATA`].

mod best;
mod median;
mod merge;
pub mod priority;

use std::fmt;
use std::str::FromStr;

use clearsky_core::{Error, Raster, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub use best::composite_best;
pub use median::composite_median;
pub use merge::merge_first_valid;

/// Nodata sentinel written by the median compositor.
pub const MEDIAN_NODATA: f32 = -9999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMethod {
    Best,
    Median,
}

impl FromStr for CompositeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "median" => Ok(Self::Median),
            other => Err(Error::InvalidParameter {
                name: "composite",
                value: other.to_string(),
                reason: "method must be 'best' or 'median'".into(),
            }),
        }
    }
}

impl fmt::Display for CompositeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Best => "best",
            Self::Median => "median",
        })
    }
}

/// Band stack and SCL of one accepted scene.
#[derive(Debug, Clone)]
pub struct CompositeScene {
    pub bands: Vec<Raster<f32>>,
    pub scl: Raster<u8>,
}

/// Composited band stack on the shared grid.
#[derive(Debug, Clone)]
pub struct MosaicResult {
    pub method: CompositeMethod,
    pub bands: Vec<Raster<f32>>,
    pub scenes: usize,
}

/// Composite `scenes` with `method`.
pub fn composite(scenes: &[CompositeScene], method: CompositeMethod) -> Result<MosaicResult> {
    let bands = match method {
        CompositeMethod::Best => composite_best(scenes)?,
        CompositeMethod::Median => composite_median(scenes)?,
    };
    Ok(MosaicResult {
        method,
        bands,
        scenes: scenes.len(),
    })
}

/// Check that every scene has the same band count and every raster the
/// grid of the first band. Returns (rows, cols, bands).
fn validate(scenes: &[CompositeScene]) -> Result<(usize, usize, usize)> {
    let first = scenes
        .first()
        .ok_or_else(|| Error::Other("no scenes to composite".into()))?;
    let template = first
        .bands
        .first()
        .ok_or_else(|| Error::Other("scene has no bands to composite".into()))?;
    let nbands = first.bands.len();

    for (i, scene) in scenes.iter().enumerate() {
        if scene.bands.len() != nbands {
            return Err(Error::Other(format!(
                "scene {} has {} bands, expected {}",
                i,
                scene.bands.len(),
                nbands
            )));
        }
        let off_grid = scene.bands.iter().any(|b| !b.same_grid(template))
            || scene.scl.shape() != template.shape();
        if off_grid {
            return Err(Error::GridMismatch(format!("scene {} is not on the shared grid", i)));
        }
    }

    let (rows, cols) = template.shape();
    Ok((rows, cols, nbands))
}

/// Split pixel-interleaved output (`[row][col][band]`) into one raster per
/// band carrying the template's georeferencing.
fn deinterleave(
    pixels: Vec<f32>,
    (rows, cols, nbands): (usize, usize, usize),
    template: &Raster<f32>,
    nodata: f32,
) -> Result<Vec<Raster<f32>>> {
    (0..nbands)
        .map(|b| {
            let values: Vec<f32> = pixels.iter().skip(b).step_by(nbands).copied().collect();
            let array = Array2::from_shape_vec((rows, cols), values)
                .map_err(|e| Error::Other(e.to_string()))?;
            let mut band = Raster::from_array(array).with_georef_of(template);
            band.set_nodata(Some(nodata));
            Ok(band)
        })
        .collect()
}
