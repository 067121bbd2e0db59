//! Scene-classification (SCL) priority classes and cloud fraction

use clearsky_core::Raster;
use ndarray::Array2;

/// Vegetation, not-vegetated and water: clear-sky classes.
pub const CLEAR_CLASSES: [u8; 3] = [4, 5, 6];
/// Unclassified pixels rank between clear and cloudy.
pub const UNCLASSIFIED: u8 = 7;
/// Classes counted as cloud or shadow for the scene cloud fraction.
pub const CLOUDY_CLASSES: [u8; 6] = [3, 7, 8, 9, 10, 11];

/// 0 = clear, 1 = unclassified, 2 = everything else (cloud, shadow, nodata…).
#[inline]
pub fn priority_class(scl: u8) -> u8 {
    if CLEAR_CLASSES.contains(&scl) {
        0
    } else if scl == UNCLASSIFIED {
        1
    } else {
        2
    }
}

pub fn priority_map(scl: &Raster<u8>) -> Array2<u8> {
    scl.data().mapv(priority_class)
}

/// Fraction of all grid pixels whose class is cloud or shadow.
pub fn cloud_fraction(scl: &Raster<u8>) -> f64 {
    if scl.is_empty() {
        return 0.0;
    }
    let cloudy = scl.data().iter().filter(|c| CLOUDY_CLASSES.contains(c)).count();
    cloudy as f64 / scl.len() as f64
}

/// Blend weight of a scene in a tie: `max(1 - cloud_fraction, 0)`.
pub fn tie_weight(cloud_fraction: f64) -> f64 {
    (1.0 - cloud_fraction).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(priority_class(4), 0);
        assert_eq!(priority_class(6), 0);
        assert_eq!(priority_class(7), 1);
        for c in [0u8, 1, 2, 3, 8, 9, 10, 11, 255] {
            assert_eq!(priority_class(c), 2, "class {c}");
        }
    }

    #[test]
    fn fraction_over_all_pixels() {
        let scl = Raster::from_vec(vec![4u8, 8, 9, 0], 2, 2).unwrap();
        assert_eq!(cloud_fraction(&scl), 0.5);
        assert_eq!(tie_weight(0.5), 0.5);
        assert_eq!(tie_weight(1.2), 0.0);
    }
}
