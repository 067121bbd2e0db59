//! Validity gate with directory rollback

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use clearsky_algorithms::bundle::SceneBundle;
use clearsky_algorithms::validity::GateDecision;
use tracing::info;

use crate::error::Result;

/// Judge `bundle` by the valid percentage of its base band. A rejected
/// scene has its whole directory removed before this returns.
pub fn apply_gate(bundle: &SceneBundle, min_valid: Option<f64>, scene_dir: &Path) -> Result<GateDecision> {
    let decision = GateDecision::evaluate(bundle.valid_percentage()?, min_valid);
    if let GateDecision::Reject { valid_pct, min_valid } = decision {
        info!(
            scene = %bundle.scene_id,
            valid_pct = format_args!("{valid_pct:.1}"),
            min_valid,
            "below min_valid, removing scene folder"
        );
        remove_scene_dir(scene_dir)?;
    }
    Ok(decision)
}

/// `rm -r`, treating an already missing directory as success.
pub fn remove_scene_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_algorithms::bundle::AlignedBand;
    use clearsky_algorithms::grid::GridSpec;

    fn bundle(valid: usize) -> SceneBundle {
        let grid = GridSpec {
            epsg: 32654,
            pixel_size: 10.0,
            origin_x: 0.0,
            origin_y: 100.0,
            width: 5,
            height: 2,
        };
        let mut mask = grid.raster(0u8);
        for (i, m) in mask.data_mut().iter_mut().enumerate() {
            *m = u8::from(i < valid);
        }
        let mut b = SceneBundle::new("S2A_TEST", grid.clone());
        b.push(AlignedBand::new("B04", grid.raster(1.0f32), mask, &grid).unwrap())
            .unwrap();
        b
    }

    #[test]
    fn rejection_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scene");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("__tmp__B04.tif"), b"x").unwrap();

        let decision = apply_gate(&bundle(3), Some(50.0), &dir).unwrap();
        assert_eq!(decision, GateDecision::Reject { valid_pct: 30.0, min_valid: 50.0 });
        assert!(!dir.exists());
    }

    #[test]
    fn acceptance_keeps_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scene");
        fs::create_dir(&dir).unwrap();

        assert!(apply_gate(&bundle(5), Some(50.0), &dir).unwrap().is_accepted());
        assert!(apply_gate(&bundle(0), None, &dir).unwrap().is_accepted());
        assert!(dir.exists());
    }

    #[test]
    fn missing_directory_is_fine() {
        let root = tempfile::tempdir().unwrap();
        remove_scene_dir(&root.path().join("never-created")).unwrap();
    }
}
