//! Band (de)stacking
//!
//! A stack is a multi-page `f32` GeoTIFF, one page per band, all pages
//! sharing one grid. The ordered band-name list is the contract between a
//! page index and the single-band file it is split into.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::io::native::{read_geotiff, read_geotiff_info, write_geotiff, write_multipage_geotiff};
use crate::raster::Raster;

/// Number of layers in a raster file.
pub fn layer_count<P: AsRef<Path>>(path: P) -> Result<usize> {
    Ok(read_geotiff_info(path)?.layers)
}

/// Split `stack` into `<out_dir>/<name>.tif`, one file per entry of `names`.
///
/// Layer `i` (0-based) goes to `names[i]`. Extra layers beyond `names` are
/// ignored; fewer layers than names is an error and nothing is written.
pub fn split_stack<S: AsRef<str>>(stack: &Path, names: &[S], out_dir: &Path) -> Result<Vec<PathBuf>> {
    let available = layer_count(stack)?;
    if available < names.len() {
        return Err(Error::NotEnoughLayers {
            path: stack.display().to_string(),
            available,
            requested: names.len(),
        });
    }

    fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let layer: Raster<f32> = read_geotiff(stack, Some(i + 1))?;
        let out = out_dir.join(format!("{}.tif", name.as_ref()));
        write_geotiff(&layer, &out)?;
        written.push(out);
    }

    info!(stack = %stack.display(), bands = names.len(), "split stack");
    Ok(written)
}

/// Combine single-band files into one stack at `out`, in the given order.
///
/// Every input must share the first input's shape, transform and CRS.
/// Source nodata values become NaN in the stack.
pub fn stack_bands<P: AsRef<Path>>(paths: &[P], out: &Path) -> Result<()> {
    let mut layers: Vec<Raster<f32>> = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let band: Raster<f32> = read_geotiff(path, None)?;
        if let Some(first) = layers.first() {
            if first.shape() != band.shape() {
                let (er, ec) = first.shape();
                let (ar, ac) = band.shape();
                return Err(Error::SizeMismatch { er, ec, ar, ac });
            }
            if !first.same_grid(&band) {
                return Err(Error::GridMismatch(format!(
                    "{} is not on the grid of the first band",
                    path.display()
                )));
            }
        }
        let mut layer = band.map(|v| if band.is_nodata(v) { f32::NAN } else { v });
        layer.set_nodata(Some(f32::NAN));
        layers.push(layer);
    }

    write_multipage_geotiff(&layers, out)?;
    info!(out = %out.display(), bands = layers.len(), "stacked bands");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CRS;
    use crate::raster::GeoTransform;

    fn band(value: f32) -> Raster<f32> {
        let mut r = Raster::filled(4, 4, value);
        r.set_transform(GeoTransform::new(500_000.0, 4_000_000.0, 10.0, -10.0));
        r.set_crs(Some(CRS::from_epsg(32633)));
        r.set_nodata(Some(f32::NAN));
        r
    }

    #[test]
    fn split_then_stack_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let stack = dir.path().join("BANDS.tif");
        write_multipage_geotiff(&[band(2.0), band(3.0), band(4.0)], &stack).unwrap();

        let names = ["B02", "B03", "B04"];
        let files = split_stack(&stack, &names, dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        let b03: Raster<f32> = read_geotiff(dir.path().join("B03.tif"), None).unwrap();
        assert_eq!(b03.get(0, 0).unwrap(), 3.0);
        assert_eq!(b03.crs().and_then(|c| c.epsg()), Some(32633));

        let restacked = dir.path().join("again.tif");
        stack_bands(&[&files[2], &files[0]], &restacked).unwrap();
        assert_eq!(layer_count(&restacked).unwrap(), 2);
        let first: Raster<f32> = read_geotiff(&restacked, Some(1)).unwrap();
        assert_eq!(first.get(3, 3).unwrap(), 4.0);
    }

    #[test]
    fn too_many_names_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stack = dir.path().join("BANDS.tif");
        write_multipage_geotiff(&[band(1.0), band(2.0)], &stack).unwrap();

        let err = split_stack(&stack, &["B02", "B03", "B04"], dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotEnoughLayers { available: 2, requested: 3, .. }));
        assert!(!dir.path().join("B02.tif").exists());
    }

    #[test]
    fn stacking_mismatched_grids_fails() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        write_geotiff(&band(1.0), &a).unwrap();
        let mut shifted = band(1.0);
        shifted.set_transform(GeoTransform::new(500_010.0, 4_000_000.0, 10.0, -10.0));
        write_geotiff(&shifted, &b).unwrap();

        let err = stack_bands(&[&a, &b], &dir.path().join("s.tif")).unwrap_err();
        assert!(matches!(err, Error::GridMismatch(_)));
    }
}
