//! clearsky CLI - cloud-aware Sentinel-2 acquisition

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use clearsky_algorithms::aoi::Aoi;
use clearsky_algorithms::composite::CompositeMethod;
use clearsky_algorithms::grid::plan_grid;
use clearsky_cloud::{mosaic_directory, CloudError, RunConfig, SceneOutcome};
use clearsky_core::io::{layer_count, read_geotiff, read_geotiff_info, split_stack, stack_bands};
use clearsky_core::Raster;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "clearsky")]
#[command(author, version, about = "Cloud-aware Sentinel-2 acquisition", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, download, align and gate the scenes of a run configuration
    Download {
        /// YAML run configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Output root; results go to <output>/<satellite>/<name>
        #[arg(short, long, default_value = "data")]
        output: PathBuf,
        /// Run name, overriding the configuration
        #[arg(long)]
        name: Option<String>,
    },
    /// Composite every finished scene folder of a run directory
    Mosaic {
        /// Run directory (<output>/<satellite>/<name>)
        run_dir: PathBuf,
        /// Compositing method: best or median
        #[arg(short, long, default_value = "best")]
        method: CompositeMethod,
    },
    /// Split a multi-band stack into one file per band
    Split {
        /// Input stack
        input: PathBuf,
        /// Band names, one per layer (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        names: Vec<String>,
        /// Output directory (defaults to the stack's directory)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Stack same-grid single-band files into one multi-band file
    Stack {
        /// Input bands, in layer order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output stack
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the target grid a configuration would use
    Grid {
        /// YAML run configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::load(path).with_context(|| format!("Failed to load configuration {}", path.display()))
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Commands ───────────────────────────────────────────────────────────

async fn download(config: &Path, output: &Path, name: Option<String>) -> Result<()> {
    let config = load_config(config)?.with_name(name);
    let start = Instant::now();

    let pb = spinner("Downloading scenes...");
    let report = clearsky_cloud::run(&config, output).await;
    pb.finish_and_clear();
    let report = match report {
        Err(e @ CloudError::Config(_)) => return Err(e).context("Invalid configuration"),
        other => other.context("Download failed")?,
    };

    println!("Run directory: {}", report.run_dir.display());
    println!(
        "Scenes: {} found, {} after overlap filter, {} kept, {} rejected",
        report.found,
        report.candidates,
        report.kept(),
        report.rejected()
    );
    for (id, outcome) in &report.scenes {
        match outcome {
            SceneOutcome::Accepted { valid_pct } => println!("  {id}: accepted ({valid_pct:.1}% valid)"),
            SceneOutcome::Skipped => println!("  {id}: already complete"),
            SceneOutcome::Rejected { valid_pct } => println!("  {id}: rejected ({valid_pct:.1}% valid)"),
            SceneOutcome::MissingAsset(reason)
            | SceneOutcome::DownloadFailed(reason)
            | SceneOutcome::Failed(reason) => println!("  {id}: failed: {reason}"),
        }
    }
    if let Some(mosaic) = &report.mosaic {
        done("Mosaic", &mosaic.stack, start.elapsed());
    } else {
        println!("  Processing time: {:.2?}", start.elapsed());
    }

    let failures = report.download_failures();
    if failures > 0 {
        bail!("{failures} scene(s) failed after exhausting download retries");
    }
    Ok(())
}

fn mosaic(run_dir: &Path, method: CompositeMethod) -> Result<()> {
    let start = Instant::now();
    let pb = spinner("Compositing...");
    let result = mosaic_directory(run_dir, method).context("Failed to composite run directory");
    pb.finish_and_clear();
    let result = result?;

    if result.method.is_none() {
        warn!("some scenes lack SCL, mosaic is a first-valid merge");
    }
    for band in &result.band_files {
        println!("  {}", band.display());
    }
    done("Mosaic", &result.stack, start.elapsed());
    Ok(())
}

fn split(input: &Path, names: &[String], out_dir: Option<PathBuf>) -> Result<()> {
    let out_dir = out_dir
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let layers = layer_count(input).context("Failed to read stack")?;
    if layers > names.len() {
        warn!(layers, names = names.len(), "extra layers are not written");
    }

    let start = Instant::now();
    let written = split_stack(input, names, &out_dir).context("Failed to split stack")?;
    for path in &written {
        println!("  {}", path.display());
    }
    done("Bands", &out_dir, start.elapsed());
    Ok(())
}

fn stack(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let start = Instant::now();
    let pb = spinner("Stacking bands...");
    let result = stack_bands(inputs, output).context("Failed to stack bands");
    pb.finish_and_clear();
    result?;
    done("Stack", output, start.elapsed());
    Ok(())
}

fn grid(config: &Path) -> Result<()> {
    let config = load_config(config)?;
    let aoi = Aoi::resolve(&config.aoi).context("Failed to resolve AOI")?;
    let grid = plan_grid(&aoi, config.target_res_m, config.target_crs_epsg).context("Failed to plan grid")?;
    let bounds = grid.bounds();

    println!("AOI area: {:.6} deg²", aoi.area());
    println!("EPSG: {}", grid.epsg);
    println!("Pixel size: {} m", grid.pixel_size);
    println!("Dimensions: {} x {} ({} cells)", grid.width, grid.height, grid.width * grid.height);
    println!(
        "Bounds: ({:.2}, {:.2}) - ({:.2}, {:.2})",
        bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
    );
    Ok(())
}

fn raster_info(input: &Path) -> Result<()> {
    let info = read_geotiff_info(input).context("Failed to read raster")?;
    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", info.width, info.height, info.width * info.height);
    println!("Layers: {}", info.layers);
    println!("Cell size: {}", info.transform.pixel_width);
    match &info.crs {
        Some(crs) => println!("CRS: {}", crs),
        None => println!("CRS: none"),
    }
    if let Some(nodata) = info.nodata {
        println!("NoData: {}", nodata);
    }

    println!("\nLayer statistics:");
    for layer in 1..=info.layers {
        let raster: Raster<f32> = read_geotiff(input, Some(layer)).context("Failed to read layer")?;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut valid = 0usize;
        for &v in raster.data().iter() {
            if raster.is_nodata(v) {
                continue;
            }
            min = min.min(v);
            max = max.max(v);
            valid += 1;
        }
        let pct = 100.0 * valid as f64 / raster.len().max(1) as f64;
        if valid > 0 {
            println!("  {layer}: min {min:.4}, max {max:.4}, valid {valid} ({pct:.1}%)");
        } else {
            println!("  {layer}: no valid cells");
        }
    }
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Download { config, output, name } => download(&config, &output, name).await?,
        Commands::Mosaic { run_dir, method } => mosaic(&run_dir, method)?,
        Commands::Split { input, names, out_dir } => split(&input, &names, out_dir)?,
        Commands::Stack { inputs, output } => stack(&inputs, &output)?,
        Commands::Grid { config } => grid(&config)?,
        Commands::Info { input } => raster_info(&input)?,
    }

    info!("done");
    Ok(())
}
