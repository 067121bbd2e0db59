//! Clear-pixel median compositing

use clearsky_core::{Raster, Result};
use tracing::debug;

use super::priority::priority_map;
use super::{deinterleave, validate, CompositeScene, MEDIAN_NODATA};
use crate::maybe_rayon::*;

/// Per-band median over the scenes that are clear (priority 0) at each
/// pixel. Pixels without any clear, finite contributor get [`MEDIAN_NODATA`].
pub fn composite_median(scenes: &[CompositeScene]) -> Result<Vec<Raster<f32>>> {
    let dims = validate(scenes)?;
    let (rows, cols, nbands) = dims;
    let priorities: Vec<_> = scenes.iter().map(|s| priority_map(&s.scl)).collect();
    debug!(scenes = scenes.len(), "median composite");

    let pixels: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut out = vec![MEDIAN_NODATA; cols * nbands];
            let mut values: Vec<f32> = Vec::with_capacity(scenes.len());
            for col in 0..cols {
                for b in 0..nbands {
                    values.clear();
                    for (s, scene) in scenes.iter().enumerate() {
                        if priorities[s][(row, col)] != 0 {
                            continue;
                        }
                        let v = unsafe { scene.bands[b].get_unchecked(row, col) };
                        if v.is_finite() {
                            values.push(v);
                        }
                    }
                    if let Some(m) = median(&mut values) {
                        out[col * nbands + b] = m;
                    }
                }
            }
            out
        })
        .collect();

    deinterleave(pixels, dims, &scenes[0].bands[0], MEDIAN_NODATA)
}

/// Median of finite values; the mean of the two middle values for even counts.
fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    })
}
