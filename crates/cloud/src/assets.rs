//! Logical band name to physical asset key resolution.

use tracing::debug;

use crate::catalog::SceneItem;
use crate::error::{CloudError, Result};

/// Logical Sentinel-2 band -> acceptable asset keys, in order of preference.
/// Earth Search uses common names, Planetary Computer the band codes.
const ASSET_TABLE: &[(&str, &[&str])] = &[
    ("B01", &["coastal", "B01"]),
    ("B02", &["blue", "B02"]),
    ("B03", &["green", "B03"]),
    ("B04", &["red", "B04"]),
    ("B05", &["rededge1", "B05"]),
    ("B06", &["rededge2", "B06"]),
    ("B07", &["rededge3", "B07"]),
    ("B08", &["nir", "B08"]),
    ("B8A", &["nir08", "B8A"]),
    ("B09", &["nir09", "B09"]),
    ("B11", &["swir16", "B11"]),
    ("B12", &["swir22", "B12"]),
    ("SCL", &["scl", "SCL"]),
    ("AOT", &["aot", "AOT"]),
    ("WVP", &["wvp", "WVP"]),
    ("VISUAL", &["visual"]),
    // synthesized from SCL
    ("DATAMASK", &["scl", "SCL"]),
];

/// Asset keys acceptable for `band`. Unknown names map to themselves.
pub fn candidates(band: &str) -> Vec<String> {
    let upper = band.to_ascii_uppercase();
    match ASSET_TABLE.iter().find(|(name, _)| *name == upper) {
        Some((_, keys)) => keys.iter().map(|k| k.to_string()).collect(),
        None => {
            let mut keys = vec![band.to_string()];
            let lower = band.to_ascii_lowercase();
            if lower != band {
                keys.push(lower);
            }
            keys
        }
    }
}

/// Resolve every band in `bands` to an href of `item`, in order.
///
/// Fails with [`CloudError::AssetNotFound`] on the first band none of
/// whose candidate keys exists.
pub fn resolve_assets(item: &SceneItem, bands: &[String]) -> Result<Vec<(String, String)>> {
    bands
        .iter()
        .map(|band| {
            let keys = candidates(band);
            let href = keys.iter().find_map(|k| item.assets.get(k));
            match href {
                Some(href) => {
                    debug!(scene = %item.id, band = %band, href = %href, "asset resolved");
                    Ok((band.clone(), href.clone()))
                }
                None => Err(CloudError::AssetNotFound {
                    item: item.id.clone(),
                    band: band.clone(),
                    candidates: keys,
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn item(keys: &[&str]) -> SceneItem {
        SceneItem {
            id: "S2A_TEST".into(),
            datetime: None,
            cloud_cover: None,
            footprint: None,
            assets: keys
                .iter()
                .map(|k| (k.to_string(), format!("https://example.com/{k}.tif")))
                .collect::<BTreeMap<_, _>>(),
            epsg: None,
        }
    }

    #[test]
    fn common_names_preferred() {
        assert_eq!(candidates("b04"), vec!["red", "B04"]);
        assert_eq!(candidates("dataMask"), vec!["scl", "SCL"]);
        assert_eq!(candidates("EVI"), vec!["EVI", "evi"]);
    }

    #[test]
    fn resolves_earth_search_and_pc_keys() {
        let es = item(&["red", "nir", "scl"]);
        let resolved = resolve_assets(&es, &["B04".into(), "B08".into(), "SCL".into()]).unwrap();
        assert_eq!(resolved[0], ("B04".into(), "https://example.com/red.tif".into()));
        assert_eq!(resolved[2].1, "https://example.com/scl.tif");

        let pc = item(&["B04", "SCL"]);
        let resolved = resolve_assets(&pc, &["B04".into(), "SCL".into()]).unwrap();
        assert_eq!(resolved[0].1, "https://example.com/B04.tif");
    }

    #[test]
    fn missing_band_is_one_error() {
        let err = resolve_assets(&item(&["red"]), &["B04".into(), "B11".into()]).unwrap_err();
        match err {
            CloudError::AssetNotFound { band, candidates, .. } => {
                assert_eq!(band, "B11");
                assert_eq!(candidates, vec!["swir16", "B11"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
