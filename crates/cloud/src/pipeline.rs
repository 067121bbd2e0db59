//! End-to-end acquisition run
//!
//! AOI -> (grid plan || catalog search) -> pre-filter -> per scene, in
//! parallel: fetch & align -> validity gate -> persist -> stack. Once every
//! scene has settled, the configuration is copied next to the results and,
//! if asked for, the run directory is composited.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clearsky_algorithms::aoi::Aoi;
use clearsky_algorithms::grid::{plan_grid, GridSpec};
use clearsky_core::io::stack_bands;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::catalog::{AssetSource, SceneCatalog, SceneItem, SearchQuery};
use crate::config::RunConfig;
use crate::error::{CloudError, Result};
use crate::fetch::{
    band_path, fetch_scene, persist_bundle, verify_persisted, write_scene_stack, FetchPlan, STACK_NAME,
};
use crate::gate::{apply_gate, remove_scene_dir};
use crate::http::HttpDownloader;
use crate::mosaic::{mosaic_scenes, DirectoryMosaic, CONFIG_COPY};
use crate::prefilter::prefilter;
use crate::scene::{SceneRecord, SceneState};
use crate::stac_client::{StacClient, StacClientOptions};

/// Whole-transfer timeout for one asset download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// What happened to one scene.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneOutcome {
    Accepted { valid_pct: f64 },
    /// Already complete on this grid, left untouched
    Skipped,
    /// Below `min_valid`; its folder was removed
    Rejected { valid_pct: f64 },
    /// A requested band has no asset in this item
    MissingAsset(String),
    /// A download ran out of retries
    DownloadFailed(String),
    Failed(String),
}

impl SceneOutcome {
    /// Whether the scene's files are on disk after the run.
    pub fn is_kept(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Skipped)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub grid: Option<GridSpec>,
    /// Items returned by the catalog
    pub found: usize,
    /// Items left after the overlap pre-filter
    pub candidates: usize,
    /// Scene id and outcome, in catalog order
    pub scenes: Vec<(String, SceneOutcome)>,
    pub mosaic: Option<DirectoryMosaic>,
}

impl RunReport {
    pub fn kept(&self) -> usize {
        self.scenes.iter().filter(|(_, o)| o.is_kept()).count()
    }

    pub fn rejected(&self) -> usize {
        self.scenes
            .iter()
            .filter(|(_, o)| matches!(o, SceneOutcome::Rejected { .. }))
            .count()
    }

    pub fn download_failures(&self) -> usize {
        self.scenes
            .iter()
            .filter(|(_, o)| matches!(o, SceneOutcome::DownloadFailed(_)))
            .count()
    }

    pub fn outcome(&self, scene_id: &str) -> Option<&SceneOutcome> {
        self.scenes.iter().find(|(id, _)| id == scene_id).map(|(_, o)| o)
    }
}

/// Acquisition pipeline over a catalog and an asset source.
pub struct Pipeline<C, S> {
    catalog: C,
    source: S,
}

impl<C: SceneCatalog, S: AssetSource> Pipeline<C, S> {
    pub fn new(catalog: C, source: S) -> Self {
        Self { catalog, source }
    }

    /// Run `config`, writing under `<output_root>/<satellite>/<name>`.
    ///
    /// An empty search or pre-filter result is not an error: the report
    /// simply lists no scenes.
    pub async fn run(&self, config: &RunConfig, output_root: &Path) -> Result<RunReport> {
        let run_dir = config.run_dir(output_root);
        tokio::fs::create_dir_all(&run_dir).await?;
        info!(run_dir = %run_dir.display(), "output base");

        let aoi = Aoi::resolve(&config.aoi).map_err(|e| CloudError::Config(e.to_string()))?;
        let query = SearchQuery {
            collection: config.collection.clone(),
            intersects: aoi.to_geojson(),
            datetime: config.datetime.clone(),
            max_cloud: config.max_cloud,
            max_items: config.max_items,
        };

        let planner = {
            let (aoi, res, epsg) = (aoi.clone(), config.target_res_m, config.target_crs_epsg);
            tokio::task::spawn_blocking(move || plan_grid(&aoi, res, epsg))
        };
        let (grid, items) = tokio::join!(planner, self.catalog.search(&query));
        let grid = grid??;
        let items = items?;
        info!(
            epsg = grid.epsg,
            width = grid.width,
            height = grid.height,
            pixel_size = grid.pixel_size,
            "target grid"
        );

        let mut report = RunReport {
            run_dir: run_dir.clone(),
            grid: Some(grid.clone()),
            found: items.len(),
            ..Default::default()
        };
        if items.is_empty() {
            warn!("no scenes found");
            return Ok(report);
        }

        let items = prefilter(items, &aoi, config.min_valid);
        report.candidates = items.len();
        if items.is_empty() {
            warn!("every scene was removed by the min_valid pre-filter");
            return Ok(report);
        }

        let plan = FetchPlan::new(&config.bands)?;
        let mut outcomes: Vec<(usize, PathBuf, String, SceneOutcome)> = stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| {
                let (plan, grid, run_dir) = (&plan, &grid, &run_dir);
                async move {
                    let dir = run_dir.join(item.dir_name());
                    let (id, outcome) = self.process_scene(item, plan, grid, run_dir, config).await;
                    (idx, dir, id, outcome)
                }
            })
            .buffer_unordered(config.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, ..)| *idx);
        let kept_dirs: Vec<PathBuf> = outcomes
            .iter()
            .filter(|(_, _, _, o)| o.is_kept())
            .map(|(_, dir, _, _)| dir.clone())
            .collect();
        report.scenes = outcomes.into_iter().map(|(_, _, id, o)| (id, o)).collect();

        tokio::fs::write(run_dir.join(CONFIG_COPY), config.source.to_yaml()?).await?;

        if let Some(method) = config.composite {
            if !kept_dirs.is_empty() {
                let dir = run_dir.clone();
                report.mosaic =
                    Some(tokio::task::spawn_blocking(move || mosaic_scenes(&dir, &kept_dirs, method)).await??);
            } else {
                warn!("no scene kept, skipping composite");
            }
        }

        info!(
            kept = report.kept(),
            rejected = report.rejected(),
            failed_downloads = report.download_failures(),
            "run finished"
        );
        Ok(report)
    }

    async fn process_scene(
        &self,
        item: SceneItem,
        plan: &FetchPlan,
        grid: &GridSpec,
        run_dir: &Path,
        config: &RunConfig,
    ) -> (String, SceneOutcome) {
        let dir = run_dir.join(item.dir_name());
        let outcome = match self.try_scene(&item, plan, grid, &dir, config).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(cleanup) = remove_scene_dir(&dir) {
                    warn!(scene = %item.id, error = %cleanup, "could not remove scene folder");
                }
                match e {
                    CloudError::AssetNotFound { .. } => {
                        warn!(scene = %item.id, error = %e, "skipping scene");
                        SceneOutcome::MissingAsset(e.to_string())
                    }
                    CloudError::DownloadFailed { .. } => {
                        error!(scene = %item.id, error = %e, "download failed");
                        SceneOutcome::DownloadFailed(e.to_string())
                    }
                    other => {
                        warn!(scene = %item.id, error = %other, "scene failed");
                        SceneOutcome::Failed(other.to_string())
                    }
                }
            }
        };
        (item.id, outcome)
    }

    async fn try_scene(
        &self,
        item: &SceneItem,
        plan: &FetchPlan,
        grid: &GridSpec,
        dir: &Path,
        config: &RunConfig,
    ) -> Result<SceneOutcome> {
        if let Some(previous) = SceneRecord::load(dir) {
            if previous.is_complete_for(grid, &config.bands) {
                let mut names = plan.output_names();
                if previous.state == SceneState::Stacked {
                    names.push(STACK_NAME.to_string());
                }
                match verify_persisted(dir, &names, grid) {
                    Ok(()) if config.stack && previous.state != SceneState::Stacked => {
                        restack(previous, plan, dir).await?;
                        info!(scene = %item.id, "already complete, stack rebuilt");
                        return Ok(SceneOutcome::Skipped);
                    }
                    Ok(()) => {
                        info!(scene = %item.id, "already complete, skipping");
                        return Ok(SceneOutcome::Skipped);
                    }
                    Err(e) => warn!(scene = %item.id, reason = %e, "persisted scene is off-grid, re-aligning"),
                }
            }
        }

        tokio::fs::create_dir_all(dir).await?;
        let mut record = SceneRecord::new(item, grid, &config.bands);
        record.advance(SceneState::PreFiltered)?;
        record.advance_and_save(SceneState::Fetching, dir)?;

        let bundle = fetch_scene(&self.source, item, plan, grid, dir).await?;
        record.advance_and_save(SceneState::Aligned, dir)?;

        let decision = apply_gate(&bundle, config.min_valid, dir)?;
        record.valid_pct = Some(decision.valid_pct());
        record.advance(SceneState::ValidityChecked)?;
        if !decision.is_accepted() {
            record.advance(SceneState::Rejected)?;
            return Ok(SceneOutcome::Rejected {
                valid_pct: decision.valid_pct(),
            });
        }
        record.save(dir)?;

        let stacked = {
            let (plan, dir, stack) = (plan.clone(), dir.to_path_buf(), config.stack);
            tokio::task::spawn_blocking(move || -> clearsky_core::Result<bool> {
                persist_bundle(&bundle, &plan, &dir)?;
                Ok(stack && write_scene_stack(&bundle, &plan, &dir)?.is_some())
            })
            .await??
        };
        record.advance_and_save(SceneState::Accepted, dir)?;
        if stacked {
            record.advance_and_save(SceneState::Stacked, dir)?;
        }

        info!(scene = %item.id, valid_pct = decision.valid_pct(), "scene accepted");
        Ok(SceneOutcome::Accepted {
            valid_pct: decision.valid_pct(),
        })
    }
}

/// Build the missing `BANDS.tif` of an accepted scene from its persisted
/// spectral band files.
async fn restack(mut record: SceneRecord, plan: &FetchPlan, dir: &Path) -> Result<()> {
    let bands: Vec<PathBuf> = plan.spectral().iter().map(|b| band_path(dir, b)).collect();
    if bands.is_empty() {
        return Ok(());
    }
    let stack = band_path(dir, STACK_NAME);
    tokio::task::spawn_blocking(move || stack_bands(&bands, &stack)).await??;
    record.advance_and_save(SceneState::Stacked, dir)
}

/// Run `config` against its STAC catalog over HTTP.
pub async fn run(config: &RunConfig, output_root: &Path) -> Result<RunReport> {
    let options = StacClientOptions {
        retry: config.retry,
        ..Default::default()
    };
    let catalog = StacClient::new(config.catalog.clone(), options)?;
    let downloader =
        HttpDownloader::new(config.retry, DOWNLOAD_TIMEOUT)?.with_signing(config.catalog.needs_signing());
    Pipeline::new(catalog, downloader).run(config, output_root).await
}
