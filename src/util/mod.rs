//! util — small helpers shared across the codec and probes.

use std::path::Path;

use crate::consts::SNAPSHOT_PAGE_SIZE;

/// Round `pos` up to the next multiple of the container page size (16 KiB).
/// `None` when the rounded value does not fit in `u64`.
#[inline]
pub fn page_align(pos: u64) -> Option<u64> {
    pos.checked_add(SNAPSHOT_PAGE_SIZE - 1)
        .map(|v| v & !(SNAPSHOT_PAGE_SIZE - 1))
}

/// True if `path` refers to a regular file (symlinks followed).
///
/// Pipes and other special files are never probed: the strategies below need
/// to rewind and mmap, neither of which works on non-seekable input.
#[inline]
pub fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
