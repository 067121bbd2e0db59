//! Priority-based "best pixel" compositing

use clearsky_core::{Raster, Result};
use tracing::debug;

use super::priority::{cloud_fraction, priority_map, tie_weight};
use super::{deinterleave, validate, CompositeScene};
use crate::maybe_rayon::*;

/// Best-pixel composite; output nodata is NaN.
pub fn composite_best(scenes: &[CompositeScene]) -> Result<Vec<Raster<f32>>> {
    let dims = validate(scenes)?;
    let (rows, cols, nbands) = dims;

    let priorities: Vec<_> = scenes.iter().map(|s| priority_map(&s.scl)).collect();
    let weights: Vec<f64> = scenes
        .iter()
        .map(|s| tie_weight(cloud_fraction(&s.scl)))
        .collect();
    debug!(scenes = scenes.len(), ?weights, "best-pixel composite");

    let pixels: Vec<f32> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut out = vec![f32::NAN; cols * nbands];
            let mut tied: Vec<usize> = Vec::with_capacity(scenes.len());
            for col in 0..cols {
                let min_p = priorities
                    .iter()
                    .map(|p| p[(row, col)])
                    .min()
                    .unwrap_or(u8::MAX);
                tied.clear();
                tied.extend((0..scenes.len()).filter(|&s| priorities[s][(row, col)] == min_p));

                let px = &mut out[col * nbands..(col + 1) * nbands];
                if let [only] = tied[..] {
                    for (b, v) in px.iter_mut().enumerate() {
                        *v = unsafe { scenes[only].bands[b].get_unchecked(row, col) };
                    }
                    continue;
                }

                let total: f64 = tied.iter().map(|&s| weights[s]).sum();
                let weight = |s: usize| if total > 0.0 { weights[s] / total } else { 1.0 / tied.len() as f64 };
                for (b, v) in px.iter_mut().enumerate() {
                    *v = blend(tied.iter().map(|&s| {
                        (unsafe { scenes[s].bands[b].get_unchecked(row, col) }, weight(s))
                    }));
                }
            }
            out
        })
        .collect();

    deinterleave(pixels, dims, &scenes[0].bands[0], f32::NAN)
}

/// Weighted mean over finite values, weights renormalized over those
/// values. NaN when no value is finite.
fn blend(values: impl Iterator<Item = (f32, f64)>) -> f32 {
    let (mut sum, mut wsum) = (0.0f64, 0.0f64);
    for (v, w) in values {
        if v.is_finite() {
            sum += v as f64 * w;
            wsum += w;
        }
    }
    if wsum > 0.0 {
        (sum / wsum) as f32
    } else {
        f32::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scene(value: f32, scl: Vec<u8>) -> CompositeScene {
        CompositeScene {
            bands: vec![Raster::filled(3, 3, value), Raster::filled(3, 3, value * 10.0)],
            scl: Raster::from_vec(scl, 3, 3).unwrap(),
        }
    }

    #[test]
    fn clear_scene_wins_unconditionally() {
        // center clear in A, cloudy in B; B is otherwise clearer overall
        let a = scene(1.0, vec![8, 8, 8, 8, 4, 8, 8, 8, 8]);
        let b = scene(2.0, vec![4, 4, 4, 4, 9, 4, 4, 4, 4]);
        let out = composite_best(&[a, b]).unwrap();
        assert_eq!(out[0].get(1, 1).unwrap(), 1.0);
        assert_eq!(out[1].get(1, 1).unwrap(), 10.0);
        assert_eq!(out[0].get(0, 0).unwrap(), 2.0);
    }

    #[test]
    fn equal_cloud_fraction_ties_average() {
        let a = scene(1.0, vec![4; 9]);
        let b = scene(3.0, vec![5; 9]);
        let out = composite_best(&[a, b]).unwrap();
        assert_relative_eq!(out[0].get(2, 2).unwrap(), 2.0);
        assert_relative_eq!(out[1].get(0, 1).unwrap(), 20.0);
    }

    #[test]
    fn tie_weighted_toward_clearer_scene() {
        // A: 1/9 cloudy pixels, B: 5/9; both clear at (0,0)
        let a = scene(0.0, vec![4, 4, 4, 4, 4, 4, 4, 4, 9]);
        let b = scene(9.0, vec![4, 8, 8, 8, 8, 8, 4, 4, 4]);
        let out = composite_best(&[a, b]).unwrap();
        let (wa, wb) = (8.0 / 9.0, 4.0 / 9.0);
        let expected = (9.0 * wb / (wa + wb)) as f32;
        assert_relative_eq!(out[0].get(0, 0).unwrap(), expected, epsilon = 1e-5);
    }

    #[test]
    fn fully_cloudy_tie_falls_back_to_equal_weights() {
        let a = scene(1.0, vec![9; 9]);
        let b = scene(5.0, vec![8; 9]);
        let out = composite_best(&[a, b]).unwrap();
        assert_relative_eq!(out[0].get(1, 1).unwrap(), 3.0);
    }

    #[test]
    fn single_scene_is_copied() {
        let out = composite_best(&[scene(7.0, vec![0; 9])]).unwrap();
        assert_eq!(out[0].get(0, 0).unwrap(), 7.0);
    }
}
