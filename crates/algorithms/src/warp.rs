//! Reprojection onto a target grid
//!
//! Inverse mapping: every target pixel center is transformed into the
//! source CRS and sampled there. The validity mask always uses nearest
//! neighbour so it never invents partially valid pixels.

use clearsky_core::crs::transform_point;
use clearsky_core::{Raster, Result};
use tracing::debug;

use crate::grid::GridSpec;
use crate::maybe_rayon::*;

/// Resampling method for data values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    /// Class-preserving, used for categorical bands and masks
    Nearest,
    /// Distance-weighted over the valid members of the 2x2 neighbourhood
    Bilinear,
}

/// Warp `src` onto `grid`.
///
/// Returns the warped values (`NaN` where invalid) and a 0/1 validity mask.
/// A source pixel is valid when it is neither NaN nor the source nodata. A
/// source with no CRS is taken to already be in the grid CRS.
pub fn warp_to_grid(src: &Raster<f32>, grid: &GridSpec, method: Resampling) -> Result<(Raster<f32>, Raster<u8>)> {
    let dst_crs = grid.crs();
    let src_crs = src.crs().cloned().unwrap_or_else(|| dst_crs.clone());
    let same_crs = src_crs.is_equivalent(&dst_crs);

    // Surface unsupported CRS pairs once, before the per-pixel loop.
    let (x0, y0) = grid.geo_transform().pixel_to_geo(0, 0);
    transform_point(&dst_crs, &src_crs, x0, y0)?;

    let (rows, cols) = grid.shape();
    let dst_gt = grid.geo_transform();
    let src_gt = *src.transform();
    let (src_rows, src_cols) = src.shape();

    let valid_at = |r: isize, c: isize| -> Option<f32> {
        if r < 0 || c < 0 || r as usize >= src_rows || c as usize >= src_cols {
            return None;
        }
        let v = unsafe { src.get_unchecked(r as usize, c as usize) };
        (!src.is_nodata(v)).then_some(v)
    };

    let pixels: Vec<(f32, u8)> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut out = vec![(f32::NAN, 0u8); cols];
            for (col, cell) in out.iter_mut().enumerate() {
                let (x, y) = dst_gt.pixel_to_geo(col, row);
                let (sx, sy) = if same_crs {
                    (x, y)
                } else {
                    match transform_point(&dst_crs, &src_crs, x, y) {
                        Ok(p) => p,
                        Err(_) => continue,
                    }
                };
                let (fc, fr) = src_gt.geo_to_pixel(sx, sy);
                if !fc.is_finite() || !fr.is_finite() {
                    continue;
                }

                let nearest = valid_at(fr.floor() as isize, fc.floor() as isize);
                let Some(nearest) = nearest else { continue };

                let value = match method {
                    Resampling::Nearest => nearest,
                    Resampling::Bilinear => bilinear(fc, fr, &valid_at).unwrap_or(nearest),
                };
                *cell = (value, 1);
            }
            out
        })
        .collect();

    let (values, mask): (Vec<f32>, Vec<u8>) = pixels.into_iter().unzip();

    let mut data = grid.raster(0.0f32);
    *data.data_mut() = ndarray::Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| clearsky_core::Error::Other(e.to_string()))?;
    data.set_nodata(Some(f32::NAN));

    let mut valid = grid.raster(0u8);
    *valid.data_mut() = ndarray::Array2::from_shape_vec((rows, cols), mask)
        .map_err(|e| clearsky_core::Error::Other(e.to_string()))?;

    debug!(
        src_crs = %src_crs,
        dst_epsg = grid.epsg,
        ?method,
        rows,
        cols,
        "warped raster onto grid"
    );
    Ok((data, valid))
}

/// Bilinear interpolation at fractional pixel position (`fc`, `fr`) using
/// only valid neighbours, weights renormalized over those present.
fn bilinear(fc: f64, fr: f64, valid_at: &impl Fn(isize, isize) -> Option<f32>) -> Option<f32> {
    // pixel centers sit at +0.5
    let x = fc - 0.5;
    let y = fr - 0.5;
    let c0 = x.floor();
    let r0 = y.floor();
    let dx = x - c0;
    let dy = y - r0;
    let (c0, r0) = (c0 as isize, r0 as isize);

    let mut sum = 0.0f64;
    let mut wsum = 0.0f64;
    for (r, c, w) in [
        (r0, c0, (1.0 - dx) * (1.0 - dy)),
        (r0, c0 + 1, dx * (1.0 - dy)),
        (r0 + 1, c0, (1.0 - dx) * dy),
        (r0 + 1, c0 + 1, dx * dy),
    ] {
        if w <= 0.0 {
            continue;
        }
        if let Some(v) = valid_at(r, c) {
            sum += v as f64 * w;
            wsum += w;
        }
    }
    (wsum > 0.0).then(|| (sum / wsum) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use clearsky_core::{GeoTransform, CRS};

    fn grid(origin_x: f64, origin_y: f64, size: f64, w: usize, h: usize) -> GridSpec {
        GridSpec {
            epsg: 32630,
            pixel_size: size,
            origin_x,
            origin_y,
            width: w,
            height: h,
        }
    }

    fn ramp(rows: usize, cols: usize, size: f64) -> Raster<f32> {
        let data = (0..rows * cols).map(|i| (i % cols) as f32).collect();
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(500_000.0, 4_000_000.0, size, -size));
        r.set_crs(Some(CRS::from_epsg(32630)));
        r
    }

    #[test]
    fn identity_grid_copies_values() {
        let src = ramp(4, 4, 10.0);
        let g = grid(500_000.0, 4_000_000.0, 10.0, 4, 4);
        let (data, mask) = warp_to_grid(&src, &g, Resampling::Bilinear).unwrap();
        assert!(g.check_raster(&data).is_ok());
        assert_eq!(data.get(2, 3).unwrap(), 3.0);
        assert_eq!(mask.data().iter().filter(|&&m| m == 1).count(), 16);
    }

    #[test]
    fn bilinear_interpolates_between_columns() {
        // 20 m source sampled at 10 m: target center x=15 sits on source col 0.75
        let src = ramp(2, 4, 20.0);
        let g = grid(500_010.0, 4_000_000.0, 10.0, 2, 2);
        let (data, _) = warp_to_grid(&src, &g, Resampling::Bilinear).unwrap();
        assert_relative_eq!(data.get(0, 0).unwrap(), 0.25, epsilon = 1e-6);

        let (nearest, _) = warp_to_grid(&src, &g, Resampling::Nearest).unwrap();
        assert_eq!(nearest.get(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn outside_source_is_invalid() {
        let src = ramp(2, 2, 10.0);
        let g = grid(499_980.0, 4_000_000.0, 10.0, 4, 1);
        let (data, mask) = warp_to_grid(&src, &g, Resampling::Nearest).unwrap();
        assert_eq!(mask.data().as_slice().unwrap(), &[0, 0, 1, 1]);
        assert!(data.get(0, 0).unwrap().is_nan());
    }

    #[test]
    fn nodata_source_pixels_stay_invalid() {
        let mut src = ramp(2, 2, 10.0);
        src.set_nodata(Some(0.0));
        let g = grid(500_000.0, 4_000_000.0, 10.0, 2, 2);
        let (data, mask) = warp_to_grid(&src, &g, Resampling::Bilinear).unwrap();
        assert_eq!(mask.get(0, 0).unwrap(), 0);
        assert_eq!(mask.get(0, 1).unwrap(), 1);
        // the invalid neighbour does not drag the value toward zero
        assert_eq!(data.get(0, 1).unwrap(), 1.0);
    }

    #[test]
    fn cross_zone_warp_lands_on_grid() {
        let mut src = Raster::filled(200, 200, 7.0f32);
        // zone 31 tile around 0.5E 45N
        let (x, y) = transform_point(&CRS::wgs84(), &CRS::from_epsg(32631), 0.49, 45.01).unwrap();
        src.set_transform(GeoTransform::new(x.floor(), y.ceil(), 10.0, -10.0));
        src.set_crs(Some(CRS::from_epsg(32631)));

        let (gx, gy) = transform_point(&CRS::wgs84(), &CRS::from_epsg(32630), 0.5, 45.0).unwrap();
        let g = grid((gx / 10.0).floor() * 10.0, (gy / 10.0).ceil() * 10.0, 10.0, 20, 20);
        let (data, mask) = warp_to_grid(&src, &g, Resampling::Bilinear).unwrap();
        assert!(g.check_raster(&data).is_ok());
        assert!(mask.data().iter().all(|&m| m == 1));
        assert_eq!(data.get(10, 10).unwrap(), 7.0);
    }
}
