//! Memory-mapped file regions with explicit permissions.
//!
//! Data sections are mapped read-only, instruction sections read-execute.
//! Offsets handed in here are container-page aligned (16 KiB), which is a
//! multiple of every OS page size we run on.

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Result};
use memmap2::{Mmap, MmapOptions};

/// Requested access for a mapped section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapPerm {
    /// Read-only (serialized heap data).
    Read,
    /// Read + execute (generated machine code).
    ReadExec,
}

/// One mapped section of a snapshot container. Unmapped on drop.
pub struct MappedRegion {
    map: Mmap,
}

impl MappedRegion {
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Map `len` bytes of `file` at `offset` with the requested permission.
///
/// The range is validated against the file length up front: mmap itself will
/// happily map past EOF and fault later on access, so a header declaring a
/// section beyond the end of the file must fail here, not at first read.
pub fn map_region(file: &File, path: &Path, perm: MapPerm, offset: u64, len: u64) -> Result<MappedRegion> {
    let file_len = file.metadata()?.len();
    let end = offset
        .checked_add(len)
        .ok_or_else(|| anyhow!("section range overflows (offset={}, len={})", offset, len))?;
    if end > file_len {
        return Err(anyhow!(
            "section [{}, {}) lies past end of file {} (len {})",
            offset,
            end,
            path.display(),
            file_len
        ));
    }

    let opts = {
        let mut o = MmapOptions::new();
        o.offset(offset).len(len as usize);
        o
    };
    let map = unsafe {
        match perm {
            MapPerm::Read => opts.map(file),
            MapPerm::ReadExec => opts.map_exec(file),
        }
    }
    .map_err(|e| {
        anyhow!(
            "failed to memory map snapshot section of {} (offset={}, len={}, {:?}): {}",
            path.display(),
            offset,
            len,
            perm,
            e
        )
    })?;

    Ok(MappedRegion { map })
}
