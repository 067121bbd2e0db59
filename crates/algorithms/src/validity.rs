//! Valid-pixel statistics and the accept/reject decision

use clearsky_core::Raster;
use serde::{Deserialize, Serialize};

/// Percentage (0–100) of non-zero cells in a validity mask. Empty masks are 0%.
pub fn valid_percentage(mask: &Raster<u8>) -> f64 {
    let total = mask.len();
    if total == 0 {
        return 0.0;
    }
    let valid = mask.data().iter().filter(|&&m| m != 0).count();
    100.0 * valid as f64 / total as f64
}

/// Outcome of the validity gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GateDecision {
    Accept { valid_pct: f64 },
    Reject { valid_pct: f64, min_valid: f64 },
}

impl GateDecision {
    /// Reject when `valid_pct < min_valid`; accept everything without a threshold.
    pub fn evaluate(valid_pct: f64, min_valid: Option<f64>) -> Self {
        match min_valid {
            Some(min_valid) if valid_pct < min_valid => Self::Reject { valid_pct, min_valid },
            _ => Self::Accept { valid_pct },
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }

    pub fn valid_pct(&self) -> f64 {
        match *self {
            Self::Accept { valid_pct } | Self::Reject { valid_pct, .. } => valid_pct,
        }
    }
}
