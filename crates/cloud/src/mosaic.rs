//! Mosaic of a run directory
//!
//! Reads the `BANDS.tif` of the finished scene folders of a run directory,
//! composites them (or merges them first-valid when some scene lacks SCL),
//! writes the run-level `BANDS.tif`, splits it into single-band files and
//! merges the per-scene `SCL.tif` and `MASK.tif`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clearsky_algorithms::bundle::{DATA_MASK, SCL};
use clearsky_algorithms::composite::{composite, merge_first_valid, CompositeMethod, CompositeScene};
use clearsky_core::io::{layer_count, read_geotiff, split_stack, write_geotiff, write_multipage_geotiff};
use clearsky_core::Raster;
use tracing::{debug, info, warn};

use crate::config::{RawConfig, DEFAULT_BANDS};
use crate::error::{CloudError, Result};
use crate::fetch::{band_path, MASK_NAME, STACK_NAME};
use crate::scene::{SceneRecord, RECORD_FILE};

/// Resolved configuration copied next to the scene folders.
pub const CONFIG_COPY: &str = "download.yaml";

/// Files produced by [`mosaic_directory`].
#[derive(Debug, Clone)]
pub struct DirectoryMosaic {
    pub stack: PathBuf,
    pub band_files: Vec<PathBuf>,
    pub scl: Option<PathBuf>,
    pub mask: Option<PathBuf>,
    pub scenes: usize,
    /// `None` when the scenes were merged first-valid for lack of SCL
    pub method: Option<CompositeMethod>,
}

/// Finished scene folders of `run_dir`, sorted by name.
///
/// Only folders whose `scene.json` is ACCEPTED or STACKED count. When the
/// records disagree on the grid, the grid of the most recently updated
/// record wins and folders on any other grid are left out.
pub fn scene_dirs(run_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut done: Vec<(PathBuf, SceneRecord)> = fs::read_dir(run_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let record = SceneRecord::load(&p).filter(|r| r.state.is_done());
            if record.is_none() && p.join(RECORD_FILE).exists() {
                debug!(scene = %p.display(), "unfinished scene folder ignored");
            }
            record.map(|r| (p, r))
        })
        .collect();

    let Some(grid) = done.iter().max_by_key(|(_, r)| r.updated).map(|(_, r)| r.grid.clone()) else {
        return Ok(Vec::new());
    };
    done.retain(|(p, r)| {
        let same = r.grid == grid;
        if !same {
            warn!(scene = %p.display(), "scene is on an older grid, left out of the mosaic");
        }
        same
    });

    let mut dirs: Vec<PathBuf> = done.into_iter().map(|(p, _)| p).collect();
    dirs.sort();
    Ok(dirs)
}

/// Spectral band names recorded in `download.yaml`: the configured bands
/// minus SCL and the data mask, or the default list.
pub fn spectral_names(run_dir: &Path) -> Vec<String> {
    let bands = match RawConfig::load(&run_dir.join(CONFIG_COPY)) {
        Ok(raw) => raw.band_list(),
        Err(_) => DEFAULT_BANDS.iter().map(|b| b.to_string()).collect(),
    };
    bands
        .into_iter()
        .map(|b| b.to_ascii_uppercase())
        .filter(|b| b != SCL && b != DATA_MASK)
        .collect()
}

/// Composite every finished scene under `run_dir` with `method`.
pub fn mosaic_directory(run_dir: &Path, method: CompositeMethod) -> Result<DirectoryMosaic> {
    let dirs = scene_dirs(run_dir)?;
    mosaic_scenes(run_dir, &dirs, method)
}

/// Composite the scene folders `dirs` into `run_dir`.
pub fn mosaic_scenes(run_dir: &Path, dirs: &[PathBuf], method: CompositeMethod) -> Result<DirectoryMosaic> {
    if dirs.is_empty() {
        return Err(not_found(format!("no finished scene folders under {}", run_dir.display())));
    }
    if let Some(dir) = dirs.iter().find(|d| !band_path(d, STACK_NAME).exists()) {
        return Err(not_found(format!("{}.tif not found in {}", STACK_NAME, dir.display())));
    }

    let stacks = dirs
        .iter()
        .map(|d| read_stack(&band_path(d, STACK_NAME)))
        .collect::<Result<Vec<_>>>()?;

    let scl_paths: Vec<PathBuf> = dirs
        .iter()
        .map(|d| band_path(d, SCL))
        .filter(|p| p.exists())
        .collect();

    let (bands, used) = if scl_paths.len() == dirs.len() {
        let scenes = stacks
            .into_iter()
            .zip(&scl_paths)
            .map(|(bands, scl)| Ok(CompositeScene { bands, scl: read_geotiff(scl, None)? }))
            .collect::<Result<Vec<_>>>()?;
        (composite(&scenes, method)?.bands, Some(method))
    } else {
        warn!(
            with_scl = scl_paths.len(),
            scenes = dirs.len(),
            "not every scene has SCL, merging first-valid"
        );
        (merge_stacks(&stacks)?, None)
    };

    let stack = band_path(run_dir, STACK_NAME);
    write_multipage_geotiff(&bands, &stack)?;

    let names = spectral_names(run_dir);
    let band_files = split_stack(&stack, &names, run_dir)?;

    let scl = merge_layer_files(&scl_paths, &band_path(run_dir, SCL))?;
    let mask_paths: Vec<PathBuf> = dirs
        .iter()
        .map(|d| band_path(d, MASK_NAME))
        .filter(|p| p.exists())
        .collect();
    let mask = merge_layer_files(&mask_paths, &band_path(run_dir, MASK_NAME))?;

    info!(
        run = %run_dir.display(),
        scenes = dirs.len(),
        method = used.map(|m| m.to_string()).unwrap_or_else(|| "merge".into()),
        "mosaic written"
    );
    Ok(DirectoryMosaic {
        stack,
        band_files,
        scl,
        mask,
        scenes: dirs.len(),
        method: used,
    })
}

fn not_found(msg: String) -> CloudError {
    CloudError::Io(io::Error::new(io::ErrorKind::NotFound, msg))
}

fn read_stack(path: &Path) -> Result<Vec<Raster<f32>>> {
    let layers = layer_count(path)?;
    (1..=layers)
        .map(|b| Ok(read_geotiff(path, Some(b))?))
        .collect()
}

/// First-valid merge, band by band.
fn merge_stacks(stacks: &[Vec<Raster<f32>>]) -> Result<Vec<Raster<f32>>> {
    let nbands = stacks.first().map(Vec::len).unwrap_or(0);
    if stacks.iter().any(|s| s.len() != nbands) {
        return Err(clearsky_core::Error::Other("scene stacks have different band counts".into()).into());
    }
    (0..nbands)
        .map(|b| {
            let layers: Vec<Raster<f32>> = stacks.iter().map(|s| s[b].clone()).collect();
            Ok(merge_first_valid(&layers)?)
        })
        .collect()
}

/// Merge same-grid `u8` files into `out`; `None` when there is nothing to merge.
fn merge_layer_files(paths: &[PathBuf], out: &Path) -> Result<Option<PathBuf>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let layers = paths
        .iter()
        .map(|p| {
            let mut layer: Raster<u8> = read_geotiff(p, None)?;
            if layer.nodata().is_none() {
                layer.set_nodata(Some(0));
            }
            Ok(layer)
        })
        .collect::<Result<Vec<_>>>()?;
    write_geotiff(&merge_first_valid(&layers)?, out)?;
    Ok(Some(out.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneState;
    use chrono::{Duration, Utc};
    use clearsky_algorithms::composite::MEDIAN_NODATA;
    use clearsky_algorithms::grid::GridSpec;
    use clearsky_core::{GeoTransform, CRS};

    fn grid(width: usize) -> GridSpec {
        GridSpec {
            epsg: 32654,
            pixel_size: 10.0,
            origin_x: 380_000.0,
            origin_y: 3_940_020.0,
            width,
            height: 2,
        }
    }

    fn write_record(dir: &Path, state: SceneState, grid: GridSpec, age_hours: i64) {
        let record = SceneRecord {
            scene_id: dir.file_name().unwrap().to_string_lossy().into_owned(),
            state,
            grid,
            bands: vec!["B04".into(), "B08".into()],
            datetime: None,
            cloud_cover: None,
            valid_pct: Some(100.0),
            updated: Utc::now() - Duration::hours(age_hours),
        };
        record.save(dir).unwrap();
    }

    fn on_grid<T: clearsky_core::RasterElement>(mut r: Raster<T>) -> Raster<T> {
        r.set_transform(GeoTransform::new(380_000.0, 3_940_020.0, 10.0, -10.0));
        r.set_crs(Some(CRS::from_epsg(32654)));
        r
    }

    fn write_scene(run: &Path, name: &str, values: [f32; 2], scl: Option<u8>) {
        let dir = run.join(name);
        fs::create_dir_all(&dir).unwrap();
        let layers: Vec<Raster<f32>> = values
            .iter()
            .map(|&v| {
                let mut r = on_grid(Raster::filled(2, 2, v));
                r.set_nodata(Some(f32::NAN));
                r
            })
            .collect();
        write_multipage_geotiff(&layers, band_path(&dir, STACK_NAME)).unwrap();
        write_record(&dir, SceneState::Stacked, grid(2), 0);
        if let Some(class) = scl {
            let mut s = on_grid(Raster::filled(2, 2, class));
            s.set_nodata(Some(0));
            write_geotiff(&s, band_path(&dir, SCL)).unwrap();
            let mut m = on_grid(Raster::filled(2, 2, 1u8));
            m.set_nodata(Some(0));
            write_geotiff(&m, band_path(&dir, MASK_NAME)).unwrap();
        }
    }

    #[test]
    fn best_composite_of_run_directory() {
        let run = tempfile::tempdir().unwrap();
        write_scene(run.path(), "scene_a", [100.0, 200.0], Some(4));
        write_scene(run.path(), "scene_b", [300.0, 400.0], Some(9));
        fs::write(run.path().join(CONFIG_COPY), "bands: [B04, B08, SCL, dataMask]\n").unwrap();

        let out = mosaic_directory(run.path(), CompositeMethod::Best).unwrap();
        assert_eq!(out.scenes, 2);
        assert_eq!(out.method, Some(CompositeMethod::Best));
        assert_eq!(out.band_files, vec![band_path(run.path(), "B04"), band_path(run.path(), "B08")]);

        let b08: Raster<f32> = read_geotiff(band_path(run.path(), "B08"), None).unwrap();
        assert_eq!(b08.get(1, 1).unwrap(), 200.0);
        assert!(out.scl.is_some());
        assert!(out.mask.is_some());
    }

    #[test]
    fn median_without_clear_scene_is_nodata() {
        let run = tempfile::tempdir().unwrap();
        write_scene(run.path(), "scene_a", [1.0, 2.0], Some(8));
        write_scene(run.path(), "scene_b", [3.0, 4.0], Some(9));
        fs::write(run.path().join(CONFIG_COPY), "assets: [B02, B03]\n").unwrap();

        mosaic_directory(run.path(), CompositeMethod::Median).unwrap();
        let b02: Raster<f32> = read_geotiff(band_path(run.path(), "B02"), None).unwrap();
        assert_eq!(b02.get(0, 0).unwrap(), MEDIAN_NODATA);
    }

    #[test]
    fn falls_back_to_merge_without_scl() {
        let run = tempfile::tempdir().unwrap();
        write_scene(run.path(), "scene_a", [f32::NAN, 2.0], Some(4));
        write_scene(run.path(), "scene_b", [5.0, 6.0], None);
        fs::write(run.path().join(CONFIG_COPY), "bands: [B04, B08]\n").unwrap();

        let out = mosaic_directory(run.path(), CompositeMethod::Best).unwrap();
        assert_eq!(out.method, None);
        let b04: Raster<f32> = read_geotiff(band_path(run.path(), "B04"), None).unwrap();
        assert_eq!(b04.get(0, 1).unwrap(), 5.0);
        let b08: Raster<f32> = read_geotiff(band_path(run.path(), "B08"), None).unwrap();
        assert_eq!(b08.get(0, 1).unwrap(), 2.0);
    }

    #[test]
    fn empty_or_incomplete_runs_fail() {
        let run = tempfile::tempdir().unwrap();
        assert!(mosaic_directory(run.path(), CompositeMethod::Best).is_err());

        let dir = run.path().join("scene_a");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(RECORD_FILE), "{}").unwrap();
        assert!(mosaic_directory(run.path(), CompositeMethod::Best).is_err());
    }

    #[test]
    fn unfinished_and_stale_scenes_are_left_out() {
        let run = tempfile::tempdir().unwrap();
        write_scene(run.path(), "scene_a", [100.0, 200.0], Some(4));
        write_scene(run.path(), "scene_crashed", [1.0, 1.0], Some(4));
        write_record(&run.path().join("scene_crashed"), SceneState::Aligned, grid(2), 0);
        write_scene(run.path(), "scene_old_grid", [2.0, 2.0], Some(4));
        write_record(&run.path().join("scene_old_grid"), SceneState::Stacked, grid(3), 5);
        fs::write(run.path().join(CONFIG_COPY), "bands: [B04, B08]\n").unwrap();

        assert_eq!(scene_dirs(run.path()).unwrap(), vec![run.path().join("scene_a")]);
        let out = mosaic_directory(run.path(), CompositeMethod::Best).unwrap();
        assert_eq!(out.scenes, 1);
        let b04: Raster<f32> = read_geotiff(band_path(run.path(), "B04"), None).unwrap();
        assert_eq!(b04.get(0, 0).unwrap(), 100.0);
    }

    #[test]
    fn mosaic_scenes_reads_only_listed_folders() {
        let run = tempfile::tempdir().unwrap();
        write_scene(run.path(), "scene_a", [100.0, 200.0], Some(4));
        write_scene(run.path(), "scene_b", [300.0, 400.0], Some(4));
        fs::write(run.path().join(CONFIG_COPY), "bands: [B04, B08]\n").unwrap();

        let out = mosaic_scenes(run.path(), &[run.path().join("scene_a")], CompositeMethod::Best).unwrap();
        assert_eq!(out.scenes, 1);
        let b04: Raster<f32> = read_geotiff(band_path(run.path(), "B04"), None).unwrap();
        assert_eq!(b04.get(0, 0).unwrap(), 100.0);
        assert!(mosaic_scenes(run.path(), &[], CompositeMethod::Best).is_err());
    }

    #[test]
    fn default_names_without_config_copy() {
        let run = tempfile::tempdir().unwrap();
        assert_eq!(spectral_names(run.path()), vec!["B02", "B03", "B04", "B08", "B11"]);
    }
}
