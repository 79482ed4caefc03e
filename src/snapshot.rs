//! The polymorphic snapshot handle.
//!
//! Every strategy (blob mmap, ELF delegate, dylib symbols) funnels into one
//! `AppSnapshot` value. Each variant owns exactly the backing resource it
//! must release — mapped regions, a loaded-image handle, or a loaded
//! library — and releases it once, on drop.

use crate::dylib::DylibSnapshot;
use crate::image::LoadedImage;
use crate::mapping::MappedRegion;

/// The four section buffers exposed to the embedding engine.
///
/// A pointer is null only when the corresponding section was absent
/// (declared size 0, or an optional dylib symbol that did not resolve).
/// Validity is tied to the `AppSnapshot` the buffers came from.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotBuffers {
    pub vm_data: *const u8,
    pub vm_instructions: *const u8,
    pub isolate_data: *const u8,
    pub isolate_instructions: *const u8,
}

impl Default for SnapshotBuffers {
    fn default() -> Self {
        Self {
            vm_data: std::ptr::null(),
            vm_instructions: std::ptr::null(),
            isolate_data: std::ptr::null(),
            isolate_instructions: std::ptr::null(),
        }
    }
}

/// Blob-container snapshot: up to four mapped regions, unmapped on drop.
pub struct MappedSnapshot {
    vm_data: Option<MappedRegion>,
    vm_instructions: Option<MappedRegion>,
    isolate_data: Option<MappedRegion>,
    isolate_instructions: Option<MappedRegion>,
}

impl MappedSnapshot {
    pub fn new(
        vm_data: Option<MappedRegion>,
        vm_instructions: Option<MappedRegion>,
        isolate_data: Option<MappedRegion>,
        isolate_instructions: Option<MappedRegion>,
    ) -> Self {
        Self {
            vm_data,
            vm_instructions,
            isolate_data,
            isolate_instructions,
        }
    }

    pub fn vm_data(&self) -> Option<&[u8]> {
        self.vm_data.as_ref().map(|m| m.as_slice())
    }

    pub fn vm_instructions(&self) -> Option<&[u8]> {
        self.vm_instructions.as_ref().map(|m| m.as_slice())
    }

    pub fn isolate_data(&self) -> Option<&[u8]> {
        self.isolate_data.as_ref().map(|m| m.as_slice())
    }

    pub fn isolate_instructions(&self) -> Option<&[u8]> {
        self.isolate_instructions.as_ref().map(|m| m.as_slice())
    }

    pub fn buffers(&self) -> SnapshotBuffers {
        fn ptr(m: &Option<MappedRegion>) -> *const u8 {
            m.as_ref().map(|r| r.as_ptr()).unwrap_or(std::ptr::null())
        }
        SnapshotBuffers {
            vm_data: ptr(&self.vm_data),
            vm_instructions: ptr(&self.vm_instructions),
            isolate_data: ptr(&self.isolate_data),
            isolate_instructions: ptr(&self.isolate_instructions),
        }
    }
}

/// A resolved snapshot, tagged by its backing store.
pub enum AppSnapshot {
    /// Sections mmapped straight out of a blob container.
    Mapped(MappedSnapshot),
    /// Sections extracted by the external ELF loader; handle owns the image.
    Image(Box<dyn LoadedImage>),
    /// Sections resolved as symbols of a loaded shared library.
    Library(DylibSnapshot),
}

impl AppSnapshot {
    pub fn buffers(&self) -> SnapshotBuffers {
        match self {
            AppSnapshot::Mapped(m) => m.buffers(),
            AppSnapshot::Image(img) => img.buffers(),
            AppSnapshot::Library(lib) => lib.buffers(),
        }
    }

    /// Name of the strategy that produced this snapshot (logging/inspect).
    pub fn kind(&self) -> &'static str {
        match self {
            AppSnapshot::Mapped(_) => "blob",
            AppSnapshot::Image(_) => "image",
            AppSnapshot::Library(_) => "dylib",
        }
    }
}
