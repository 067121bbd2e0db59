//! Aligned bands and per-scene bundles

use clearsky_core::{Error, Raster, Result};
use serde::{Deserialize, Serialize};

use crate::composite::CompositeScene;
use crate::grid::GridSpec;
use crate::validity::valid_percentage;
use crate::warp::Resampling;

/// Preference order for the band that anchors a scene's metadata and
/// validity percentage.
pub const BASE_BAND_PREFERENCE: [&str; 8] = ["B04", "B03", "B02", "B08", "B11", "VISUAL", "SCL", "DATAMASK"];

/// Logical name of the scene-classification band.
pub const SCL: &str = "SCL";
/// Logical name of the derived data mask; persisted as `MASK`.
pub const DATA_MASK: &str = "DATAMASK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandKind {
    /// Reflectance-like values, resampled bilinearly, stored as f32
    Continuous,
    /// Class codes, resampled nearest, stored as u8
    Categorical,
    /// 0/1 validity, stored as u8
    Mask,
}

impl BandKind {
    pub fn of(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            SCL => Self::Categorical,
            DATA_MASK | "MASK" => Self::Mask,
            _ => Self::Continuous,
        }
    }

    pub fn resampling(self) -> Resampling {
        match self {
            Self::Continuous => Resampling::Bilinear,
            Self::Categorical | Self::Mask => Resampling::Nearest,
        }
    }
}

/// Pick the base band among `requested` by [`BASE_BAND_PREFERENCE`],
/// falling back to the first requested band.
pub fn choose_base_band(requested: &[String]) -> Option<&str> {
    BASE_BAND_PREFERENCE
        .iter()
        .find_map(|pref| requested.iter().find(|b| b.eq_ignore_ascii_case(pref)))
        .or_else(|| requested.first())
        .map(String::as_str)
}

/// One band of one scene, on the run grid, with its validity mask.
#[derive(Debug, Clone)]
pub struct AlignedBand {
    pub name: String,
    pub kind: BandKind,
    pub data: Raster<f32>,
    pub mask: Raster<u8>,
}

impl AlignedBand {
    /// Wrap warped data, checking both rasters against `grid`.
    pub fn new(name: impl Into<String>, data: Raster<f32>, mask: Raster<u8>, grid: &GridSpec) -> Result<Self> {
        grid.check_raster(&data)?;
        grid.check_raster(&mask)?;
        let name = name.into();
        Ok(Self {
            kind: BandKind::of(&name),
            name,
            data,
            mask,
        })
    }

    /// Values as u8 class codes, invalid pixels set to 0.
    pub fn to_classes(&self) -> Raster<u8> {
        let mut out = self.mask.clone();
        for (o, &v) in out.data_mut().iter_mut().zip(self.data.data().iter()) {
            *o = if *o != 0 && v.is_finite() { v.round().clamp(0.0, 255.0) as u8 } else { 0 };
        }
        out.set_nodata(Some(0));
        out
    }

    pub fn valid_percentage(&self) -> f64 {
        valid_percentage(&self.mask)
    }
}

/// All aligned bands of one scene. Every band shares the bundle grid.
#[derive(Debug, Clone)]
pub struct SceneBundle {
    pub scene_id: String,
    pub grid: GridSpec,
    bands: Vec<AlignedBand>,
    base: Option<String>,
}

impl SceneBundle {
    pub fn new(scene_id: impl Into<String>, grid: GridSpec) -> Self {
        Self {
            scene_id: scene_id.into(),
            grid,
            bands: Vec::new(),
            base: None,
        }
    }

    /// Add a band, replacing any band of the same name.
    pub fn push(&mut self, band: AlignedBand) -> Result<()> {
        self.grid.check_raster(&band.data)?;
        self.bands.retain(|b| !b.name.eq_ignore_ascii_case(&band.name));
        self.bands.push(band);
        Ok(())
    }

    pub fn set_base(&mut self, name: &str) {
        self.base = Some(name.to_ascii_uppercase());
    }

    pub fn bands(&self) -> &[AlignedBand] {
        &self.bands
    }

    pub fn get(&self, name: &str) -> Option<&AlignedBand> {
        self.bands.iter().find(|b| b.name.eq_ignore_ascii_case(name))
    }

    /// The base band, or the first band when none was chosen.
    pub fn base_band(&self) -> Option<&AlignedBand> {
        self.base
            .as_deref()
            .and_then(|name| self.get(name))
            .or_else(|| self.bands.first())
    }

    pub fn scl(&self) -> Option<Raster<u8>> {
        self.get(SCL).map(AlignedBand::to_classes)
    }

    /// Data mask derived from SCL: class 0 and invalid pixels are 0, the rest 1.
    pub fn data_mask(&self) -> Option<Raster<u8>> {
        self.scl().map(|scl| {
            let mut mask = scl.map(|c| u8::from(c != 0));
            mask.set_nodata(Some(0));
            mask
        })
    }

    /// Continuous bands in insertion order.
    pub fn spectral_bands(&self) -> impl Iterator<Item = &AlignedBand> {
        self.bands.iter().filter(|b| b.kind == BandKind::Continuous)
    }

    /// Valid-pixel percentage of the base band's mask.
    pub fn valid_percentage(&self) -> Result<f64> {
        self.base_band()
            .map(AlignedBand::valid_percentage)
            .ok_or_else(|| Error::Other(format!("scene {} has no bands", self.scene_id)))
    }

    /// Spectral bands plus SCL, ready for compositing.
    pub fn to_composite_scene(&self) -> Option<CompositeScene> {
        Some(CompositeScene {
            bands: self.spectral_bands().map(|b| b.data.clone()).collect(),
            scl: self.scl()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsky_core::CRS;

    fn grid() -> GridSpec {
        GridSpec {
            epsg: 32654,
            pixel_size: 10.0,
            origin_x: 380_000.0,
            origin_y: 3_940_000.0,
            width: 3,
            height: 2,
        }
    }

    fn band(name: &str, values: Vec<f32>, valid: Vec<u8>) -> AlignedBand {
        let g = grid();
        let mut data = g.raster(0.0f32);
        *data.data_mut() = ndarray::Array2::from_shape_vec((2, 3), values).unwrap();
        let mut mask = g.raster(0u8);
        *mask.data_mut() = ndarray::Array2::from_shape_vec((2, 3), valid).unwrap();
        AlignedBand::new(name, data, mask, &g).unwrap()
    }

    #[test]
    fn base_band_preference() {
        let req = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(choose_base_band(&req(&["B02", "B04", "SCL"])), Some("B04"));
        assert_eq!(choose_base_band(&req(&["scl", "b03"])), Some("b03"));
        assert_eq!(choose_base_band(&req(&["AOT"])), Some("AOT"));
        assert_eq!(choose_base_band(&[]), None);
    }

    #[test]
    fn band_kinds() {
        assert_eq!(BandKind::of("scl"), BandKind::Categorical);
        assert_eq!(BandKind::of("dataMask"), BandKind::Mask);
        assert_eq!(BandKind::of("B8A").resampling(), Resampling::Bilinear);
    }

    #[test]
    fn off_grid_band_is_rejected() {
        let g = grid();
        let mut data = g.raster(0.0f32);
        data.set_crs(Some(CRS::from_epsg(32653)));
        let mask = g.raster(1u8);
        assert!(AlignedBand::new("B04", data, mask, &g).is_err());
    }

    #[test]
    fn data_mask_from_scl() {
        let mut bundle = SceneBundle::new("S2A_X", grid());
        bundle
            .push(band("SCL", vec![0.0, 4.0, 8.0, 9.0, f32::NAN, 6.0], vec![1, 1, 1, 1, 0, 1]))
            .unwrap();
        let mask = bundle.data_mask().unwrap();
        assert_eq!(mask.data().as_slice().unwrap(), &[0, 1, 1, 1, 0, 1]);
    }

    #[test]
    fn valid_percentage_uses_base_band() {
        let mut bundle = SceneBundle::new("S2A_X", grid());
        bundle.push(band("B02", vec![1.0; 6], vec![1, 1, 1, 1, 1, 1])).unwrap();
        bundle.push(band("B04", vec![1.0; 6], vec![1, 1, 1, 0, 0, 0])).unwrap();
        bundle.set_base("b04");
        assert_eq!(bundle.valid_percentage().unwrap(), 50.0);
        assert_eq!(bundle.spectral_bands().count(), 2);
        assert!(bundle.to_composite_scene().is_none());
    }
}
