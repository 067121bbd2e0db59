//! Error types for the acquisition pipeline.

use thiserror::Error;

/// Errors produced while searching, downloading and aligning scenes.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("asset for '{band}' not found in item {item} (candidates={candidates:?})")]
    AssetNotFound {
        item: String,
        band: String,
        candidates: Vec<String>,
    },

    #[error("download of {url} failed after {attempts} attempt(s): {reason}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("scene {scene}: illegal state transition {from} -> {to}")]
    InvalidTransition {
        scene: String,
        from: String,
        to: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("core error: {0}")]
    Core(#[from] clearsky_core::Error),
}

impl CloudError {
    /// Whether this error means a download ran out of retries.
    pub fn is_download_exhausted(&self) -> bool {
        matches!(self, Self::DownloadFailed { .. })
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, CloudError>;
