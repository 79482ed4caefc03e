//! Shared constants of the snapshot container formats (blob, trailer,
//! Mach-O embedding, dylib symbol contract).

// -------- Blob container --------

/// 8-byte magic shared by the blob header and the appended trailer.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"APSNAP01";

/// Header layout (LE): [magic8][vm_data i64][vm_instr i64][iso_data i64][iso_instr i64].
pub const SNAPSHOT_HEADER_SIZE: u64 = 40;

/// Sections are placed at 16 KiB boundaries inside the container.
pub const SNAPSHOT_PAGE_SIZE: u64 = 16 * 1024;

// -------- Appended trailer --------

/// Trailer at end-of-file (LE): [offset_to_image i64][magic8].
pub const APPENDED_TRAILER_SIZE: u64 = 16;

// -------- Mach-O embedding --------

/// Reserved (segment, section) name pair holding an embedded image.
pub const MACHO_SNAPSHOT_SEGMENT: &str = "__CUSTOM";
pub const MACHO_SNAPSHOT_SECTION: &str = "__app_snapshot";

// -------- Dynamic-library symbol contract --------

// The two vm-scope symbols are optional; the two isolate-scope symbols are
// mandatory (see dylib module).
pub const VM_SNAPSHOT_DATA_SYMBOL: &str = "kVmSnapshotData";
pub const VM_SNAPSHOT_INSTRUCTIONS_SYMBOL: &str = "kVmSnapshotInstructions";
pub const ISOLATE_SNAPSHOT_DATA_SYMBOL: &str = "kIsolateSnapshotData";
pub const ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL: &str = "kIsolateSnapshotInstructions";

// -------- Exit codes (bin) --------

pub const COMPILATION_ERROR_EXIT_CODE: i32 = 254;
pub const GENERIC_ERROR_EXIT_CODE: i32 = 255;
