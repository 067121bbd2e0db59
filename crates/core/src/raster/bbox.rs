//! Axis-aligned bounding boxes and pixel windows

use serde::{Deserialize, Serialize};

use crate::raster::GeoTransform;

/// An axis-aligned bounding box in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Grow the box so it contains `(x, y)`.
    pub fn expand_to(self, x: f64, y: f64) -> Self {
        Self {
            min_x: self.min_x.min(x),
            min_y: self.min_y.min(y),
            max_x: self.max_x.max(x),
            max_y: self.max_y.max(y),
        }
    }

    /// Check if two bboxes intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// `[min_x, min_y, max_x, max_y]`, the STAC/GeoJSON ordering.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

/// A rectangular window of pixels inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    /// Window of an image covering `bbox`, grown by `margin` pixels on every
    /// side and clamped to the image. `None` when the box misses the image.
    pub fn for_bbox(
        bbox: &BBox,
        transform: &GeoTransform,
        image_width: usize,
        image_height: usize,
        margin: usize,
    ) -> Option<Self> {
        // For north-up images, min_y maps to max_row and max_y to min_row.
        let (col_a, row_a) = transform.geo_to_pixel(bbox.min_x, bbox.max_y);
        let (col_b, row_b) = transform.geo_to_pixel(bbox.max_x, bbox.min_y);
        if !(col_a.is_finite() && col_b.is_finite() && row_a.is_finite() && row_b.is_finite()) {
            return None;
        }

        let m = margin as isize;
        let clamp = |v: isize, hi: usize| (v.max(0) as usize).min(hi);
        let min_col = clamp(col_a.min(col_b).floor() as isize - m, image_width);
        let max_col = clamp(col_a.max(col_b).ceil() as isize + m, image_width);
        let min_row = clamp(row_a.min(row_b).floor() as isize - m, image_height);
        let max_row = clamp(row_a.max(row_b).ceil() as isize + m, image_height);

        if min_col >= max_col || min_row >= max_row {
            return None;
        }

        Some(Self {
            col_off: min_col,
            row_off: min_row,
            width: max_col - min_col,
            height: max_row - min_row,
        })
    }

    /// Geotransform of the window, given the full image transform.
    pub fn transform(&self, full: &GeoTransform) -> GeoTransform {
        let (x, y) = full.pixel_to_geo_corner(self.col_off, self.row_off);
        GeoTransform {
            origin_x: x,
            origin_y: y,
            ..*full
        }
    }
}
