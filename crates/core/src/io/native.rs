//! Native GeoTIFF reading and writing with the `tiff` crate
//!
//! Reads honour ModelTiepoint/ModelPixelScale (or ModelTransformation),
//! the EPSG code from the GeoKeyDirectory and the GDAL nodata tag. Reads can
//! be limited to a pixel window, in which case only the strips or tiles that
//! overlap it are decoded. Writes produce one page per layer and always go
//! through a `.part` file that is renamed into place.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, Gray16, Gray32Float, Gray8};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::write_atomic;
use crate::raster::{GeoTransform, PixelWindow, Raster, RasterElement};

// GeoKey IDs
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;

/// Header-level description of a GeoTIFF.
#[derive(Debug, Clone)]
pub struct GeoTiffInfo {
    pub width: usize,
    pub height: usize,
    /// Pages for multi-page files, samples per pixel otherwise
    pub layers: usize,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

/// Sample types that can be written as a single-channel GeoTIFF page.
pub trait GeoTiffSample: RasterElement {
    type Color: colortype::ColorType<Inner = Self>;
}

impl GeoTiffSample for f32 {
    type Color = Gray32Float;
}

impl GeoTiffSample for u16 {
    type Color = Gray16;
}

impl GeoTiffSample for u8 {
    type Color = Gray8;
}

struct Georef {
    transform: Option<GeoTransform>,
    crs: Option<CRS>,
    nodata: Option<f64>,
}

fn open(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited()))
}

/// Read one layer of a GeoTIFF into a Raster.
///
/// `band` is 1-indexed and defaults to 1. It selects a page in multi-page
/// files and a sample in single-page multi-sample files.
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    read_layer(path.as_ref(), band, None)
}

/// Read only `window` of one layer. The returned raster's transform is
/// shifted to the window origin.
pub fn read_geotiff_window<T, P>(path: P, band: Option<usize>, window: PixelWindow) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    read_layer(path.as_ref(), band, Some(window))
}

/// Read dimensions, layer count and georeferencing without decoding pixels.
pub fn read_geotiff_info<P: AsRef<Path>>(path: P) -> Result<GeoTiffInfo> {
    let mut decoder = open(path.as_ref())?;
    let (width, height) = decoder.dimensions()?;
    let georef = read_georef(&mut decoder);
    let samples = samples_per_pixel(decoder.colortype()?);

    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        pages += 1;
    }

    Ok(GeoTiffInfo {
        width: width as usize,
        height: height as usize,
        layers: if pages > 1 { pages } else { samples },
        transform: georef.transform.unwrap_or_default(),
        crs: georef.crs,
        nodata: georef.nodata,
    })
}

fn read_layer<T: RasterElement>(
    path: &Path,
    band: Option<usize>,
    window: Option<PixelWindow>,
) -> Result<Raster<T>> {
    let band = band.unwrap_or(1);
    if band == 0 {
        return Err(Error::InvalidParameter {
            name: "band",
            value: "0".into(),
            reason: "bands are 1-indexed".into(),
        });
    }

    let mut decoder = open(path)?;
    let georef = read_georef(&mut decoder);
    let samples = samples_per_pixel(decoder.colortype()?);

    let sample = if samples > 1 {
        if band > samples {
            return Err(Error::NotEnoughLayers {
                path: path.display().to_string(),
                available: samples,
                requested: band,
            });
        }
        band - 1
    } else {
        for page in 1..band {
            if !decoder.more_images() {
                return Err(Error::NotEnoughLayers {
                    path: path.display().to_string(),
                    available: page,
                    requested: band,
                });
            }
            decoder.next_image()?;
        }
        0
    };

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    let window = window.unwrap_or(PixelWindow {
        col_off: 0,
        row_off: 0,
        width,
        height,
    });
    if window.width == 0
        || window.height == 0
        || window.col_off + window.width > width
        || window.row_off + window.height > height
    {
        return Err(Error::InvalidParameter {
            name: "window",
            value: format!("{:?}", window),
            reason: format!("outside {}x{} image", width, height),
        });
    }

    debug!(
        path = %path.display(),
        band,
        cols = window.width,
        rows = window.height,
        "reading GeoTIFF layer"
    );

    let values = read_window_from::<T, _>(&mut decoder, window, sample, samples)?;
    let mut raster = Raster::from_vec(values, window.height, window.width)?;
    raster.set_transform(window.transform(&georef.transform.unwrap_or_default()));
    raster.set_crs(georef.crs);
    raster.set_nodata(georef.nodata.and_then(num_traits::cast));
    Ok(raster)
}

/// Decode the chunks (strips or tiles) overlapping `window` and copy the
/// requested sample into a row-major buffer.
fn read_window_from<T, R>(
    decoder: &mut Decoder<R>,
    window: PixelWindow,
    sample: usize,
    samples: usize,
) -> Result<Vec<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let planar_separate = decoder
        .get_tag_u32(Tag::PlanarConfiguration)
        .map(|v| v == 2)
        .unwrap_or(false);
    let (image_w, image_h) = decoder.dimensions()?;
    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
    let across = (image_w as usize).div_ceil(chunk_w);
    let down = (image_h as usize).div_ceil(chunk_h);

    let (stride, offset, plane) = if planar_separate {
        (1, 0, sample * across * down)
    } else {
        (samples, sample, 0)
    };

    let col_end = window.col_off + window.width;
    let row_end = window.row_off + window.height;
    let mut out = vec![T::default_nodata(); window.width * window.height];

    for chunk_row in window.row_off / chunk_h..=(row_end - 1) / chunk_h {
        for chunk_col in window.col_off / chunk_w..=(col_end - 1) / chunk_w {
            let index = (plane + chunk_row * across + chunk_col) as u32;
            let (data_w, data_h) = decoder.chunk_data_dimensions(index);
            let (data_w, data_h) = (data_w as usize, data_h as usize);
            let values: Vec<T> = decoded_to(decoder.read_chunk(index)?)?;

            let x0 = chunk_col * chunk_w;
            let y0 = chunk_row * chunk_h;
            let cols = window.col_off.max(x0)..col_end.min(x0 + data_w);
            for r in window.row_off.max(y0)..row_end.min(y0 + data_h) {
                let dst_row = (r - window.row_off) * window.width;
                for c in cols.clone() {
                    let src = ((r - y0) * data_w + (c - x0)) * stride + offset;
                    if let Some(&v) = values.get(src) {
                        out[dst_row + c - window.col_off] = v;
                    }
                }
            }
        }
    }

    Ok(out)
}

fn decoded_to<T: RasterElement>(result: DecodingResult) -> Result<Vec<T>> {
    macro_rules! cast_all {
        ($buf:expr) => {
            $buf.into_iter()
                .map(|v| num_traits::cast::<_, T>(v).unwrap_or_else(T::default_nodata))
                .collect()
        };
    }

    #[allow(unreachable_patterns)]
    let values = match result {
        DecodingResult::U8(buf) => cast_all!(buf),
        DecodingResult::U16(buf) => cast_all!(buf),
        DecodingResult::U32(buf) => cast_all!(buf),
        DecodingResult::U64(buf) => cast_all!(buf),
        DecodingResult::I8(buf) => cast_all!(buf),
        DecodingResult::I16(buf) => cast_all!(buf),
        DecodingResult::I32(buf) => cast_all!(buf),
        DecodingResult::I64(buf) => cast_all!(buf),
        DecodingResult::F32(buf) => cast_all!(buf),
        DecodingResult::F64(buf) => cast_all!(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ))
        }
    };
    Ok(values)
}

#[allow(unreachable_patterns)]
fn samples_per_pixel(color: ColorType) -> usize {
    match color {
        ColorType::Gray(_) | ColorType::Palette(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) | ColorType::YCbCr(_) => 3,
        ColorType::RGBA(_) | ColorType::CMYK(_) => 4,
        _ => 1,
    }
}

fn read_georef<R: Read + Seek>(decoder: &mut Decoder<R>) -> Georef {
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
    let transform = match (tiepoint, scale) {
        (Some(tp), Some(sc)) => GeoTransform::from_tiepoint(&tp, &sc),
        _ => decoder
            .get_tag_f64_vec(Tag::ModelTransformationTag)
            .ok()
            .and_then(|m| GeoTransform::from_model_transformation(&m)),
    };

    let crs = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .ok()
        .and_then(|keys| epsg_from_geokeys(&keys))
        .map(CRS::from_epsg);

    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse::<f64>().ok());

    Georef { transform, crs, nodata }
}

/// EPSG code from a GeoKeyDirectory: the projected CS key wins over the
/// geographic one. User-defined codes are ignored.
fn epsg_from_geokeys(keys: &[u16]) -> Option<u32> {
    if keys.len() < 4 {
        return None;
    }
    let count = keys[3] as usize;
    let mut geographic = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == USER_DEFINED {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE => return Some(value as u32),
            GEOGRAPHIC_TYPE => geographic = Some(value as u32),
            _ => {}
        }
    }
    geographic
}

fn geokeys(crs: Option<&CRS>) -> Vec<u16> {
    let epsg = crs.and_then(|c| c.epsg()).and_then(|e| u16::try_from(e).ok());
    let geographic = crs.is_some_and(|c| c.is_geographic());
    let model_type = if geographic { 2 } else { 1 };

    let mut keys = vec![
        1, 1, 0, 2, // version 1.1.0, key count patched below
        GT_MODEL_TYPE, 0, 1, model_type,
        GT_RASTER_TYPE, 0, 1, 1, // RasterPixelIsArea
    ];
    if let Some(code) = epsg {
        let key = if geographic { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
        keys.extend_from_slice(&[key, 0, 1, code]);
        keys[3] = 3;
    }
    keys
}

fn format_nodata(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", v)
    }
}

fn encode_page<W, T>(encoder: &mut TiffEncoder<W>, raster: &Raster<T>) -> Result<()>
where
    W: Write + Seek,
    T: GeoTiffSample,
    [T]: TiffValue,
{
    let (rows, cols) = raster.shape();
    let data: Vec<T> = raster.data().iter().copied().collect();
    let gt = raster.transform();

    let mut image = encoder.new_image::<T::Color>(cols as u32, rows as u32)?;
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &[gt.pixel_width, gt.pixel_height.abs(), 0.0][..])?;
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0][..])?;
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, geokeys(raster.crs()).as_slice())?;
    if let Some(nodata) = raster.nodata().and_then(|v| v.to_f64()) {
        image
            .encoder()
            .write_tag(Tag::GdalNodata, format_nodata(nodata).as_str())?;
    }
    image.write_data(&data)?;
    Ok(())
}

/// Write a raster as a single-page GeoTIFF.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: GeoTiffSample,
    [T]: TiffValue,
    P: AsRef<Path>,
{
    write_multipage_geotiff(std::slice::from_ref(raster), path)
}

/// Write several same-typed rasters as consecutive pages of one GeoTIFF.
pub fn write_multipage_geotiff<T, P>(layers: &[Raster<T>], path: P) -> Result<()>
where
    T: GeoTiffSample,
    [T]: TiffValue,
    P: AsRef<Path>,
{
    if layers.is_empty() {
        return Err(Error::Other("no layers to write".into()));
    }
    let path = path.as_ref();
    write_atomic(path, |tmp| {
        let mut writer = BufWriter::new(File::create(tmp)?);
        {
            let mut encoder = TiffEncoder::new(&mut writer)?;
            for layer in layers {
                encode_page(&mut encoder, layer)?;
            }
        }
        writer.flush()?;
        Ok(())
    })?;
    debug!(path = %path.display(), pages = layers.len(), "wrote GeoTIFF");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn utm_raster(rows: usize, cols: usize) -> Raster<f32> {
        let data: Vec<f32> = (0..rows * cols).map(|i| i as f32).collect();
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(399_960.0, 4_000_020.0, 10.0, -10.0));
        r.set_crs(Some(CRS::from_epsg(32630)));
        r.set_nodata(Some(f32::NAN));
        r
    }

    #[test]
    fn samples_per_pixel_by_color_type() {
        assert_eq!(samples_per_pixel(ColorType::Gray(32)), 1);
        assert_eq!(samples_per_pixel(ColorType::GrayA(8)), 2);
        assert_eq!(samples_per_pixel(ColorType::RGB(16)), 3);
        assert_eq!(samples_per_pixel(ColorType::RGBA(8)), 4);
    }

    #[test]
    fn f32_page_keeps_georeference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B04.tif");
        let mut raster = utm_raster(4, 5);
        raster.set(1, 1, f32::NAN).unwrap();
        write_geotiff(&raster, &path).unwrap();
        assert!(!dir.path().join("B04.tif.part").exists());

        let back: Raster<f32> = read_geotiff(&path, None).unwrap();
        assert_eq!(back.shape(), (4, 5));
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(32630));
        assert_relative_eq!(back.transform().origin_x, 399_960.0);
        assert_relative_eq!(back.transform().pixel_height, -10.0);
        assert!(back.nodata().is_some_and(|v| v.is_nan()));
        assert!(back.get(1, 1).unwrap().is_nan());
        assert_eq!(back.get(3, 4).unwrap(), 19.0);
    }

    #[test]
    fn u8_page_with_integer_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SCL.tif");
        let mut scl = Raster::from_vec(vec![0u8, 4, 8, 9], 2, 2).unwrap();
        scl.set_crs(Some(CRS::wgs84()));
        scl.set_nodata(Some(0));
        write_geotiff(&scl, &path).unwrap();

        let info = read_geotiff_info(&path).unwrap();
        assert_eq!(info.crs.and_then(|c| c.epsg()), Some(4326));
        assert_eq!(info.nodata, Some(0.0));
        assert_eq!(info.layers, 1);

        let back: Raster<u8> = read_geotiff(&path, Some(1)).unwrap();
        assert_eq!(back.nodata(), Some(0));
        assert_eq!(back.valid_count(), 3);
    }

    #[test]
    fn window_read_shifts_transform() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("win.tif");
        write_geotiff(&utm_raster(30, 20), &path).unwrap();

        let window = PixelWindow {
            col_off: 3,
            row_off: 11,
            width: 4,
            height: 5,
        };
        let sub: Raster<f32> = read_geotiff_window(&path, None, window).unwrap();
        assert_eq!(sub.shape(), (5, 4));
        assert_eq!(sub.get(0, 0).unwrap(), (11 * 20 + 3) as f32);
        assert_eq!(sub.get(4, 3).unwrap(), (15 * 20 + 6) as f32);
        assert_relative_eq!(sub.transform().origin_x, 399_990.0);
        assert_relative_eq!(sub.transform().origin_y, 3_999_910.0);
    }

    #[test]
    fn pages_are_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let a = utm_raster(3, 3);
        let b = a.map(|v| v * 2.0);
        write_multipage_geotiff(&[a, b], &path).unwrap();

        assert_eq!(read_geotiff_info(&path).unwrap().layers, 2);
        let second: Raster<f32> = read_geotiff(&path, Some(2)).unwrap();
        assert_eq!(second.get(2, 2).unwrap(), 16.0);
        assert!(matches!(
            read_geotiff::<f32, _>(&path, Some(3)),
            Err(Error::NotEnoughLayers { available: 2, requested: 3, .. })
        ));
    }

    #[test]
    fn geokey_parsing_prefers_projected() {
        let keys = [1, 1, 0, 3, 1024, 0, 1, 1, 2048, 0, 1, 4326, 3072, 0, 1, 32631];
        assert_eq!(epsg_from_geokeys(&keys), Some(32631));
        let keys = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        assert_eq!(epsg_from_geokeys(&keys), Some(4326));
        assert_eq!(epsg_from_geokeys(&[1, 1, 0]), None);
    }
}
