//! Per-scene processing state, persisted as `<scene>/scene.json`
//!
//! ```text
//! SEARCHED -> PRE_FILTERED -> FETCHING -> ALIGNED -> VALIDITY_CHECKED -> ACCEPTED -> STACKED
//!                                                                    \-> REJECTED
//! ```
//!
//! A re-run consults the record to decide whether a scene can be skipped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clearsky_algorithms::grid::GridSpec;
use clearsky_core::io::part_path;
use serde::{Deserialize, Serialize};

use crate::catalog::SceneItem;
use crate::error::{CloudError, Result};

pub const RECORD_FILE: &str = "scene.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SceneState {
    Searched,
    PreFiltered,
    Fetching,
    Aligned,
    ValidityChecked,
    Accepted,
    Rejected,
    Stacked,
}

impl SceneState {
    pub fn can_advance_to(self, next: SceneState) -> bool {
        use SceneState::*;
        matches!(
            (self, next),
            (Searched, PreFiltered)
                | (PreFiltered, Fetching)
                | (Fetching, Aligned)
                | (Aligned, ValidityChecked)
                | (ValidityChecked, Accepted)
                | (ValidityChecked, Rejected)
                | (Accepted, Stacked)
        )
    }

    /// Accepted scenes, stacked or not, have their band files in place.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Accepted | Self::Stacked)
    }
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Searched => "SEARCHED",
            Self::PreFiltered => "PRE_FILTERED",
            Self::Fetching => "FETCHING",
            Self::Aligned => "ALIGNED",
            Self::ValidityChecked => "VALIDITY_CHECKED",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Stacked => "STACKED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene_id: String,
    pub state: SceneState,
    pub grid: GridSpec,
    pub bands: Vec<String>,
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cloud_cover: Option<f64>,
    #[serde(default)]
    pub valid_pct: Option<f64>,
    pub updated: DateTime<Utc>,
}

impl SceneRecord {
    pub fn new(item: &SceneItem, grid: &GridSpec, bands: &[String]) -> Self {
        Self {
            scene_id: item.id.clone(),
            state: SceneState::Searched,
            grid: grid.clone(),
            bands: bands.to_vec(),
            datetime: item.datetime,
            cloud_cover: item.cloud_cover,
            valid_pct: None,
            updated: Utc::now(),
        }
    }

    pub fn path(scene_dir: &Path) -> PathBuf {
        scene_dir.join(RECORD_FILE)
    }

    /// Move to `next`, failing on transitions outside the lifecycle.
    pub fn advance(&mut self, next: SceneState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(CloudError::InvalidTransition {
                scene: self.scene_id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated = Utc::now();
        Ok(())
    }

    /// [`advance`](Self::advance) then [`save`](Self::save).
    pub fn advance_and_save(&mut self, next: SceneState, scene_dir: &Path) -> Result<()> {
        self.advance(next)?;
        self.save(scene_dir)
    }

    /// Whether this record describes a finished scene for the same grid and bands.
    pub fn is_complete_for(&self, grid: &GridSpec, bands: &[String]) -> bool {
        self.state.is_done() && &self.grid == grid && self.bands == bands
    }

    /// Read the record of `scene_dir`; `None` when absent or unreadable.
    pub fn load(scene_dir: &Path) -> Option<Self> {
        let text = fs::read_to_string(Self::path(scene_dir)).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save(&self, scene_dir: &Path) -> Result<()> {
        let path = Self::path(scene_dir);
        let tmp = part_path(&path);
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
