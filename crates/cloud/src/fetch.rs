//! Download and alignment of the bands of one scene
//!
//! Every band is downloaded to `__tmp__<BAND>.tif` inside the scene
//! directory, read over the window covering the run grid, warped onto the
//! grid and deleted. Nothing is written to the final band files until the
//! scene passes the validity gate (see [`persist_bundle`]).

use std::path::{Path, PathBuf};

use clearsky_algorithms::bundle::{choose_base_band, AlignedBand, BandKind, SceneBundle, DATA_MASK, SCL};
use clearsky_algorithms::grid::GridSpec;
use clearsky_algorithms::warp::warp_to_grid;
use clearsky_core::crs::transform_bounds;
use clearsky_core::io::{read_geotiff_info, read_geotiff_window, write_geotiff, write_multipage_geotiff};
use clearsky_core::{Error, PixelWindow, Raster};
use tracing::{debug, info, warn};

use crate::assets::resolve_assets;
use crate::catalog::{AssetSource, SceneItem};
use crate::error::{CloudError, Result};

/// Prefix of downloaded, not yet aligned, band files.
pub const TMP_PREFIX: &str = "__tmp__";
/// Name of the per-scene (and mosaic) band stack.
pub const STACK_NAME: &str = "BANDS";
/// File name of the data mask synthesized from SCL.
pub const MASK_NAME: &str = "MASK";

const BOUNDS_DENSIFY: usize = 21;
const WINDOW_MARGIN: usize = 2;

/// Which bands a scene needs downloaded and which files it ends up with.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    /// Bands to download, in request order
    pub fetch: Vec<String>,
    /// Whether `MASK` is derived from SCL
    pub synthesize_mask: bool,
    /// Band whose validity decides the gate
    pub base: String,
}

impl FetchPlan {
    /// Plan for logical `bands`. A data mask request adds SCL to the
    /// download list and is never fetched itself.
    pub fn new(bands: &[String]) -> Result<Self> {
        let bands: Vec<String> = bands.iter().map(|b| b.to_ascii_uppercase()).collect();
        let synthesize_mask = bands.iter().any(|b| b == DATA_MASK);
        let mut fetch: Vec<String> = bands.into_iter().filter(|b| b != DATA_MASK).collect();
        if synthesize_mask && !fetch.iter().any(|b| b == SCL) {
            fetch.push(SCL.to_string());
        }
        let base = choose_base_band(&fetch)
            .ok_or_else(|| CloudError::Config("no bands to fetch".into()))?
            .to_string();
        Ok(Self {
            fetch,
            synthesize_mask,
            base,
        })
    }

    /// Stems of the single-band files a finished scene holds.
    pub fn output_names(&self) -> Vec<String> {
        let mut names = self.fetch.clone();
        if self.synthesize_mask {
            names.push(MASK_NAME.to_string());
        }
        names
    }

    /// Continuous bands, in stack order.
    pub fn spectral(&self) -> Vec<String> {
        self.fetch
            .iter()
            .filter(|b| BandKind::of(b) == BandKind::Continuous)
            .cloned()
            .collect()
    }
}

/// `<dir>/<name>.tif`
pub fn band_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.tif"))
}

// ---------------------------------------------------------------------------
// Fetch & align
// ---------------------------------------------------------------------------

/// Download every band of `plan` for `item` and align it onto `grid`.
///
/// Asset keys are resolved once up front, so a scene missing a band fails
/// with [`CloudError::AssetNotFound`] before anything is downloaded.
pub async fn fetch_scene<S: AssetSource>(
    source: &S,
    item: &SceneItem,
    plan: &FetchPlan,
    grid: &GridSpec,
    scene_dir: &Path,
) -> Result<SceneBundle> {
    let hrefs = resolve_assets(item, &plan.fetch)?;
    let mut bundle = SceneBundle::new(&item.id, grid.clone());

    for (band, href) in hrefs {
        let tmp = scene_dir.join(format!("{TMP_PREFIX}{band}.tif"));
        source.fetch(&href, &tmp).await?;

        let kind = BandKind::of(&band);
        let (path, target) = (tmp.clone(), grid.clone());
        let aligned = tokio::task::spawn_blocking(move || read_aligned(&path, &target, kind)).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            warn!(scene = %item.id, band = %band, error = %e, "could not remove temporary download");
        }
        let (data, mask) = aligned??;

        let aligned = AlignedBand::new(band, data, mask, grid)?;
        debug!(scene = %item.id, band = %aligned.name, valid_pct = aligned.valid_percentage(), "band aligned");
        bundle.push(aligned)?;
    }

    bundle.set_base(&plan.base);
    Ok(bundle)
}

/// Read the part of `path` under `grid` and warp it onto the grid.
///
/// Continuous bands are resampled bilinearly, categorical bands and masks
/// with nearest neighbour. A file with no CRS is taken to be in the grid CRS.
pub fn read_aligned(path: &Path, grid: &GridSpec, kind: BandKind) -> clearsky_core::Result<(Raster<f32>, Raster<u8>)> {
    let info = read_geotiff_info(path)?;
    let grid_crs = grid.crs();
    let src_crs = info.crs.clone().unwrap_or_else(|| grid_crs.clone());
    let bounds = transform_bounds(&grid_crs, &src_crs, &grid.bounds(), BOUNDS_DENSIFY)?;

    let Some(window) = PixelWindow::for_bbox(&bounds, &info.transform, info.width, info.height, WINDOW_MARGIN) else {
        debug!(path = %path.display(), "source does not cover the grid");
        let mut empty = grid.raster(f32::NAN);
        empty.set_nodata(Some(f32::NAN));
        return Ok((empty, grid.raster(0u8)));
    };

    let src: Raster<f32> = read_geotiff_window(path, None, window)?;
    warp_to_grid(&src, grid, kind.resampling())
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Write the bands of an accepted scene: continuous bands as `f32` with NaN
/// nodata, categorical bands as `u8` with nodata 0, plus `MASK` when planned.
pub fn persist_bundle(bundle: &SceneBundle, plan: &FetchPlan, scene_dir: &Path) -> clearsky_core::Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(bundle.bands().len() + 1);
    for band in bundle.bands() {
        let path = band_path(scene_dir, &band.name);
        match band.kind {
            BandKind::Continuous => {
                let mut data = band.data.clone();
                data.set_nodata(Some(f32::NAN));
                write_geotiff(&data, &path)?;
            }
            BandKind::Categorical | BandKind::Mask => write_geotiff(&band.to_classes(), &path)?,
        }
        written.push(path);
    }

    if plan.synthesize_mask {
        let mask = bundle
            .data_mask()
            .ok_or_else(|| Error::Other(format!("scene {} has no SCL to derive MASK from", bundle.scene_id)))?;
        let path = band_path(scene_dir, MASK_NAME);
        write_geotiff(&mask, &path)?;
        written.push(path);
    }

    info!(scene = %bundle.scene_id, files = written.len(), "scene saved");
    Ok(written)
}

/// Write the continuous bands of `bundle`, in plan order, as `BANDS.tif`.
/// Returns `None` when the scene has no continuous band.
pub fn write_scene_stack(bundle: &SceneBundle, plan: &FetchPlan, scene_dir: &Path) -> clearsky_core::Result<Option<PathBuf>> {
    let layers: Vec<Raster<f32>> = plan
        .spectral()
        .iter()
        .filter_map(|name| bundle.get(name))
        .map(|b| {
            let mut data = b.data.clone();
            data.set_nodata(Some(f32::NAN));
            data
        })
        .collect();
    if layers.is_empty() {
        return Ok(None);
    }
    let path = band_path(scene_dir, STACK_NAME);
    write_multipage_geotiff(&layers, &path)?;
    Ok(Some(path))
}

/// Check that every file a finished scene should hold exists and sits on `grid`.
pub fn verify_persisted(scene_dir: &Path, names: &[String], grid: &GridSpec) -> clearsky_core::Result<()> {
    for name in names {
        let path = band_path(scene_dir, name);
        let info = read_geotiff_info(&path)?;
        let epsg = info.crs.as_ref().and_then(|c| c.epsg());
        let on_grid = (info.height, info.width) == grid.shape()
            && epsg == Some(grid.epsg)
            && info.transform.approx_eq(&grid.geo_transform(), grid.pixel_size * 1e-6);
        if !on_grid {
            return Err(Error::GridMismatch(format!(
                "{} is {}x{} EPSG:{:?}, grid is {}x{} EPSG:{}",
                path.display(),
                info.width,
                info.height,
                epsg,
                grid.width,
                grid.height,
                grid.epsg
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_core::io::read_geotiff;
    use clearsky_core::{GeoTransform, CRS};

    fn grid() -> GridSpec {
        GridSpec {
            epsg: 32654,
            pixel_size: 10.0,
            origin_x: 380_000.0,
            origin_y: 3_940_000.0,
            width: 4,
            height: 3,
        }
    }

    /// A 20 m source covering the grid, in the same CRS.
    fn write_source(path: &Path, value: f32) {
        let mut src = Raster::filled(4, 4, value);
        src.set_transform(GeoTransform::new(379_980.0, 3_940_020.0, 20.0, -20.0));
        src.set_crs(Some(CRS::from_epsg(32654)));
        write_geotiff(&src, path).unwrap();
    }

    #[test]
    fn plan_adds_scl_for_data_mask() {
        let plan = FetchPlan::new(&["b08".into(), "dataMask".into()]).unwrap();
        assert_eq!(plan.fetch, vec!["B08", "SCL"]);
        assert!(plan.synthesize_mask);
        assert_eq!(plan.base, "B08");
        assert_eq!(plan.output_names(), vec!["B08", "SCL", "MASK"]);
        assert_eq!(plan.spectral(), vec!["B08"]);

        let plan = FetchPlan::new(&["SCL".into(), "B03".into(), "B04".into()]).unwrap();
        assert_eq!(plan.base, "B04");
        assert!(!plan.synthesize_mask);
        assert!(FetchPlan::new(&[]).is_err());
    }

    #[test]
    fn aligned_read_lands_on_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.tif");
        write_source(&path, 1200.0);

        let (data, mask) = read_aligned(&path, &grid(), BandKind::Continuous).unwrap();
        grid().check_raster(&data).unwrap();
        grid().check_raster(&mask).unwrap();
        assert_eq!(data.get(1, 2).unwrap(), 1200.0);
        assert!(mask.data().iter().all(|&m| m == 1));
    }

    #[test]
    fn disjoint_source_gives_empty_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("far.tif");
        let mut src = Raster::filled(4, 4, 5.0f32);
        src.set_transform(GeoTransform::new(500_000.0, 4_000_000.0, 20.0, -20.0));
        src.set_crs(Some(CRS::from_epsg(32654)));
        write_geotiff(&src, &path).unwrap();

        let (data, mask) = read_aligned(&path, &grid(), BandKind::Continuous).unwrap();
        assert!(data.data().iter().all(|v| v.is_nan()));
        assert!(mask.data().iter().all(|&m| m == 0));
    }

    #[test]
    fn persisted_files_match_grid() {
        let dir = tempfile::tempdir().unwrap();
        let g = grid();
        let plan = FetchPlan::new(&["B04".into(), "SCL".into(), "DATAMASK".into()]).unwrap();

        let mut bundle = SceneBundle::new("S2A_TEST", g.clone());
        bundle
            .push(AlignedBand::new("B04", g.raster(800.0f32), g.raster(1u8), &g).unwrap())
            .unwrap();
        let mut scl = g.raster(4.0f32);
        scl.set(0, 0, 0.0).unwrap();
        bundle.push(AlignedBand::new("SCL", scl, g.raster(1u8), &g).unwrap()).unwrap();
        bundle.set_base(&plan.base);

        let files = persist_bundle(&bundle, &plan, dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        verify_persisted(dir.path(), &plan.output_names(), &g).unwrap();

        let mask: Raster<u8> = read_geotiff(band_path(dir.path(), MASK_NAME), None).unwrap();
        assert_eq!(mask.get(0, 0).unwrap(), 0);
        assert_eq!(mask.get(2, 3).unwrap(), 1);
        let scl: Raster<u8> = read_geotiff(band_path(dir.path(), "SCL"), None).unwrap();
        assert_eq!(scl.get(1, 1).unwrap(), 4);

        let stack = write_scene_stack(&bundle, &plan, dir.path()).unwrap().unwrap();
        assert_eq!(clearsky_core::io::layer_count(&stack).unwrap(), 1);

        let mut moved = g.clone();
        moved.origin_x += 10.0;
        assert!(matches!(
            verify_persisted(dir.path(), &plan.output_names(), &moved),
            Err(Error::GridMismatch(_))
        ));
        assert!(verify_persisted(dir.path(), &["B08".into()], &g).is_err());
    }
}
