//! Strategy orchestration: fixed probe order, first match wins.
//!
//! Order for a script path: regular-file check, blob container, dynamic
//! library (skipped under `force_load_from_memory`), then the executable
//! probe (Mach-O embedded section, appended trailer, bare image at offset
//! 0). A miss everywhere is `Ok(None)` — a legitimate "compile from source
//! instead", never an error.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, info};

use crate::blob;
use crate::dylib;
use crate::image::ImageLoader;
use crate::probe;
use crate::snapshot::AppSnapshot;
use crate::util::is_regular_file;

/// Resolver knobs, passed explicitly instead of living in process globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverConfig {
    /// Skip the dynamic-library strategy and make the image loader work
    /// from bytes read here rather than mapping the file itself.
    pub force_load_from_memory: bool,
}

pub struct Resolver {
    config: ResolverConfig,
    loader: Box<dyn ImageLoader>,
}

impl Resolver {
    pub fn new(loader: Box<dyn ImageLoader>) -> Self {
        Self {
            config: ResolverConfig::default(),
            loader,
        }
    }

    pub fn with_config(config: ResolverConfig, loader: Box<dyn ImageLoader>) -> Self {
        Self { config, loader }
    }

    /// Resolve `script_path` to a snapshot, or `Ok(None)` when the caller
    /// must compile from source.
    pub fn try_read(&self, script_path: &Path) -> Result<Option<AppSnapshot>> {
        // Refuse to probe pipes and other special files: no rewind, no mmap.
        if !is_regular_file(script_path) {
            debug!("resolver: {} is not a regular file", script_path.display());
            return Ok(None);
        }

        if let Some(snapshot) = blob::try_read_snapshot_blob(script_path)? {
            info!("resolver: {} resolved as blob container", script_path.display());
            return Ok(Some(snapshot));
        }

        // Every strategy past the blob reader works on the resolved path:
        // the dynamic loader needs an absolute name, and the image probes
        // follow the same file the library open would have hit.
        let resolved = resolve_script_path(script_path);
        let script_path = resolved.as_path();

        if !self.config.force_load_from_memory {
            if let Some(snapshot) = dylib::try_read_snapshot_dylib(script_path)? {
                info!("resolver: {} resolved as dynamic library", script_path.display());
                return Ok(Some(snapshot));
            }
        }

        if let Some(snapshot) =
            probe::try_read_appended_snapshot(script_path, self.loader.as_ref(), self.config.force_load_from_memory)?
        {
            info!("resolver: {} resolved as embedded image", script_path.display());
            return Ok(Some(snapshot));
        }

        // The file itself may be a bare loader-compatible image.
        if let Some(snapshot) = probe::try_read_image_snapshot(
            script_path,
            0,
            self.loader.as_ref(),
            self.config.force_load_from_memory,
        )? {
            info!("resolver: {} resolved as standalone image", script_path.display());
            return Ok(Some(snapshot));
        }

        Ok(None)
    }
}

/// The dynamic loader will not search the filesystem for bare names like
/// `libapp.so`, so Linux and macOS resolve to an absolute path before the
/// open call. Other platforms pass the path through untouched.
fn resolve_script_path(path: &Path) -> PathBuf {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        path.to_path_buf()
    }
}
