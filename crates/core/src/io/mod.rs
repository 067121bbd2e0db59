//! GeoTIFF I/O and band (de)stacking

mod native;
pub mod stack;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use native::{
    read_geotiff, read_geotiff_info, read_geotiff_window, write_geotiff, write_multipage_geotiff,
    GeoTiffInfo, GeoTiffSample,
};
pub use stack::{layer_count, split_stack, stack_bands};

/// Sibling path with `.part` appended to the file name.
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Run `write` against `<path>.part`, then rename it over `path`.
///
/// On failure the partial file is removed and `path` is left untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = part_path(path);
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
