//! # clearsky cloud
//!
//! The I/O half of the acquisition pipeline: STAC search, asset download,
//! per-scene fetch & align, the validity gate and run-level mosaics.
//!
//! ## Modules
//!
//! - **config**: YAML run configuration and its defaults
//! - **stac_client** / **stac_models**: paginated STAC item search
//! - **http**: streaming asset downloads with retry and URL signing
//! - **prefilter**: footprint/AOI overlap filter
//! - **fetch**: download, window-read and warp every band of a scene
//! - **gate**: validity decision with folder rollback
//! - **scene**: persisted per-scene lifecycle
//! - **mosaic**: composite a finished run directory
//! - **pipeline**: the end-to-end run

pub mod assets;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod http;
pub mod mosaic;
pub mod pipeline;
pub mod prefilter;
pub mod retry;
pub mod scene;
pub mod stac_client;
pub mod stac_models;

pub use catalog::{AssetSource, SceneCatalog, SceneItem, SearchQuery};
pub use config::{RawConfig, RunConfig};
pub use error::{CloudError, Result};
pub use http::HttpDownloader;
pub use mosaic::{mosaic_directory, mosaic_scenes, DirectoryMosaic};
pub use pipeline::{run, Pipeline, RunReport, SceneOutcome};
pub use retry::RetryPolicy;
pub use stac_client::{StacCatalog, StacClient, StacClientOptions};
pub use stac_models::{StacItem, StacItemCollection, StacSearchParams};
