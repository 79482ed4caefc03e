pub mod consts;
pub mod util;

// Backing stores
pub mod mapping;
pub mod snapshot;

// Strategies
pub mod blob;   // blob container codec (write + mmap read)
pub mod macho;  // platform-executable structure walker
pub mod image;  // external ELF-loader delegate contract
pub mod dylib;  // shared-library symbol strategy
pub mod probe;  // trailer + embedded-section probes

// Orchestration and production
pub mod resolve;
pub mod gen;

pub mod cli;

// Convenience re-exports
pub use blob::{compute_layout, try_read_snapshot_blob, write_snapshot_blob, SectionSet, SnapshotHeader};
pub use image::{ImageLoader, LoadedImage};
pub use resolve::{Resolver, ResolverConfig};
pub use snapshot::{AppSnapshot, MappedSnapshot, SnapshotBuffers};
