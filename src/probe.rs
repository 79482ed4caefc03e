//! Executable-format probe.
//!
//! Determines whether a container file carries an embedded snapshot, either
//! inside a reserved Mach-O section or behind an appended end-of-file
//! trailer, and hands the resulting byte range to the external image loader.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error};

use crate::consts::{APPENDED_TRAILER_SIZE, SNAPSHOT_MAGIC};
use crate::image::ImageLoader;
use crate::macho;
use crate::snapshot::AppSnapshot;

/// True if the file starts with any Mach-O magic. Open/read failures count
/// as "not Mach-O".
pub fn is_macho_file(path: &Path) -> bool {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut magic = [0u8; 4];
    match f.read_exact(&mut magic) {
        Ok(()) => macho::is_macho_magic(&magic),
        Err(_) => false,
    }
}

/// Decode the 16-byte end-of-file trailer: [offset i64 LE][magic8].
///
/// `Ok(Some(offset))` only when the magic matches and the offset is strictly
/// positive; everything else means "no embedded image here".
pub fn read_appended_trailer(path: &Path) -> Result<Option<u64>> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("trailer: cannot open {}: {}", path.display(), e);
            return Ok(None);
        }
    };
    let len = f.metadata()?.len();
    if len < APPENDED_TRAILER_SIZE {
        return Ok(None);
    }

    let mut trailer = [0u8; APPENDED_TRAILER_SIZE as usize];
    f.seek(SeekFrom::Start(len - APPENDED_TRAILER_SIZE))?;
    f.read_exact(&mut trailer)?;

    if &trailer[8..16] != SNAPSHOT_MAGIC {
        return Ok(None);
    }
    let offset = LittleEndian::read_i64(&trailer[..8]);
    if offset <= 0 {
        return Ok(None);
    }
    Ok(Some(offset as u64))
}

/// Hand (path, offset) to the image loader.
///
/// In memory mode the file is read here and the loader gets the raw bytes;
/// otherwise the loader maps the file itself. A loader failure is reported
/// and treated as a miss, matching the engine's fall-back-to-source policy.
pub fn try_read_image_snapshot(
    path: &Path,
    file_offset: u64,
    loader: &dyn ImageLoader,
    force_load_from_memory: bool,
) -> Result<Option<AppSnapshot>> {
    let loaded = if force_load_from_memory {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                debug!("image: cannot read {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        let start = usize::try_from(file_offset).map_err(|_| {
            anyhow!("image offset {} does not fit in memory on this platform", file_offset)
        })?;
        let image = match bytes.get(start..) {
            Some(s) => s,
            None => {
                return Err(anyhow!(
                    "image offset {} past end of {} (len {})",
                    file_offset,
                    path.display(),
                    bytes.len()
                ))
            }
        };
        loader.load_memory(image)
    } else {
        loader.load_file(path, file_offset)
    };

    match loaded {
        Ok(image) => Ok(Some(AppSnapshot::Image(image))),
        Err(e) => {
            error!("Loading failed: {}", e);
            Ok(None)
        }
    }
}

/// Mach-O branch: locate the reserved section and load its bytes in memory
/// mode (the image length comes from the section, not "rest of the file").
///
/// Unsupported headers (32-bit, byte-swapped) are diagnosed and yield a
/// miss; a matched section lying outside the file is a structural failure.
pub fn try_read_macho_snapshot(path: &Path, loader: &dyn ImageLoader) -> Result<Option<AppSnapshot>> {
    let bytes = std::fs::read(path).with_context(|| format!("read Mach-O container {}", path.display()))?;

    let extent = match macho::find_snapshot_section(&bytes) {
        Ok(Some(e)) => e,
        Ok(None) => return Ok(None),
        Err(e) => {
            error!("{}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let end = extent
        .offset
        .checked_add(extent.size)
        .ok_or_else(|| anyhow!("embedded section range overflows"))?;
    let image = bytes
        .get(extent.offset as usize..end as usize)
        .ok_or_else(|| {
            anyhow!(
                "embedded section [{}, {}) past end of {} (len {})",
                extent.offset,
                end,
                path.display(),
                bytes.len()
            )
        })?;

    match loader.load_memory(image) {
        Ok(img) => Ok(Some(AppSnapshot::Image(img))),
        Err(e) => {
            error!("Loading failed: {}", e);
            Ok(None)
        }
    }
}

/// Full probe: Mach-O search when the file carries that magic, otherwise
/// the appended-trailer search.
pub fn try_read_appended_snapshot(
    path: &Path,
    loader: &dyn ImageLoader,
    force_load_from_memory: bool,
) -> Result<Option<AppSnapshot>> {
    if is_macho_file(path) {
        return try_read_macho_snapshot(path, loader);
    }
    match read_appended_trailer(path)? {
        Some(offset) => try_read_image_snapshot(path, offset, loader, force_load_from_memory),
        None => Ok(None),
    }
}
