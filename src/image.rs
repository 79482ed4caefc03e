//! Generic-loader delegate contract.
//!
//! Extraction of a fully-linked image out of an ELF binary is an external
//! concern: this crate only computes correct byte ranges and owns the
//! resulting handle. The delegate is consumed through these traits and is
//! free to mmap internally (path mode) or to work from bytes the probe has
//! already pulled out of a container (memory mode).

use std::path::Path;

use anyhow::Result;

use crate::snapshot::SnapshotBuffers;

/// An opaque loaded image plus the four extracted section pointers.
///
/// The pointers stay valid for as long as the handle lives; dropping the
/// handle unloads the image.
pub trait LoadedImage {
    fn buffers(&self) -> SnapshotBuffers;
}

/// External ELF-image loader.
///
/// Both call modes of the delegate must be supported:
/// - `load_file`: (path, byte offset) — lets the delegate map the file
///   itself, preferred where kernel-assisted mapping is available;
/// - `load_memory`: raw image bytes — used when the probe already extracted
///   the image (Mach-O embedded section) or when direct-path loading is
///   disabled by configuration. The delegate must not retain a borrow of
///   `image`; anything it needs past the call it copies or remaps.
///
/// Errors carry the delegate's diagnostic; the probe reports them and treats
/// the strategy as a miss.
pub trait ImageLoader {
    fn load_file(&self, path: &Path, file_offset: u64) -> Result<Box<dyn LoadedImage>>;
    fn load_memory(&self, image: &[u8]) -> Result<Box<dyn LoadedImage>>;
}
