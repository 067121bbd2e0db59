//! First-valid merge, the fallback when scenes carry no SCL

use clearsky_core::{Error, Raster, RasterElement, Result};

/// Merge same-grid layers: each pixel takes the first layer (in order)
/// whose value is not nodata. Output nodata is the first layer's nodata.
pub fn merge_first_valid<T: RasterElement>(layers: &[Raster<T>]) -> Result<Raster<T>> {
    let (first, rest) = layers
        .split_first()
        .ok_or_else(|| Error::Other("no layers to merge".into()))?;

    let mut out = first.clone();
    for layer in rest {
        if !layer.same_grid(first) {
            return Err(Error::GridMismatch("merge inputs must share one grid".into()));
        }
        let nodata = out.nodata();
        for (o, &v) in out.data_mut().iter_mut().zip(layer.data().iter()) {
            if o.is_nodata(nodata) && !layer.is_nodata(v) {
                *o = v;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_gaps_in_order() {
        let mut a = Raster::from_vec(vec![0u8, 4, 0, 0], 2, 2).unwrap();
        a.set_nodata(Some(0));
        let mut b = Raster::from_vec(vec![8u8, 9, 0, 5], 2, 2).unwrap();
        b.set_nodata(Some(0));
        let mut c = Raster::from_vec(vec![1u8, 1, 6, 1], 2, 2).unwrap();
        c.set_nodata(Some(0));

        let merged = merge_first_valid(&[a, b, c]).unwrap();
        assert_eq!(merged.data().as_slice().unwrap(), &[8, 4, 6, 5]);
    }

    #[test]
    fn nan_counts_as_gap() {
        let a = Raster::from_vec(vec![f32::NAN, 1.0], 1, 2).unwrap();
        let b = Raster::from_vec(vec![2.0f32, 3.0], 1, 2).unwrap();
        let merged = merge_first_valid(&[a, b]).unwrap();
        assert_eq!(merged.get(0, 0).unwrap(), 2.0);
        assert_eq!(merged.get(0, 1).unwrap(), 1.0);
    }
}
