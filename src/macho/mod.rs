//! Mach-O structure walker.
//!
//! Finds the reserved (`__CUSTOM`, `__app_snapshot`) section that holds an
//! embedded image inside a Mach-O executable. Only 64-bit, non-byte-swapped
//! headers are supported; anything else is rejected up front.
//!
//! The walk reads raw structures out of a byte buffer. Every read is bounds
//! checked against the buffer and against each command's declared `cmdsize`
//! before `ncmds`/`nsects` are trusted, so malformed counts fail cleanly
//! instead of running off the end.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{MACHO_SNAPSHOT_SECTION, MACHO_SNAPSHOT_SEGMENT};

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SEGMENT_64: u32 = 0x19;

pub const MACH_HEADER_64_SIZE: usize = 32;
pub const LOAD_COMMAND_SIZE: usize = 8;
pub const SEGMENT_COMMAND_64_SIZE: usize = 72;
pub const SECTION_64_SIZE: usize = 80;

// Field offsets inside the structures we touch.
const MH_OFF_NCMDS: usize = 16;
const SEG_OFF_NSECTS: usize = 64;
const SECT_OFF_SECTNAME: usize = 0;
const SECT_OFF_SEGNAME: usize = 16;
const SECT_OFF_SIZE: usize = 40;
const SECT_OFF_OFFSET: usize = 48;

/// (offset, size) of an embedded image inside the container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedExtent {
    pub offset: u64,
    pub size: u64,
}

/// True if the leading bytes carry any Mach-O magic (either width, either
/// byte order). This only gates whether the Mach-O search applies at all.
pub fn is_macho_magic(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    matches!(
        LittleEndian::read_u32(&bytes[..4]),
        MH_MAGIC | MH_CIGAM | MH_MAGIC_64 | MH_CIGAM_64
    )
}

fn read_u32(bytes: &[u8], off: usize) -> Result<u32> {
    bytes
        .get(off..off + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| anyhow!("Mach-O read of 4 bytes at {} past end of buffer ({})", off, bytes.len()))
}

fn read_u64(bytes: &[u8], off: usize) -> Result<u64> {
    bytes
        .get(off..off + 8)
        .map(LittleEndian::read_u64)
        .ok_or_else(|| anyhow!("Mach-O read of 8 bytes at {} past end of buffer ({})", off, bytes.len()))
}

/// Compare a fixed 16-byte, NUL-padded name field against `want`.
fn name_eq(field: &[u8], want: &str) -> bool {
    let trimmed = match field.iter().position(|&b| b == 0) {
        Some(i) => &field[..i],
        None => field,
    };
    trimmed == want.as_bytes()
}

/// Search a Mach-O image for the reserved snapshot section.
///
/// - `Ok(Some(extent))` — first matching section wins.
/// - `Ok(None)` — not Mach-O at all, or no command carries the section.
/// - `Err` — byte-swapped or 32-bit header (unsupported, rejected before any
///   scan), or structurally malformed metadata.
pub fn find_snapshot_section(bytes: &[u8]) -> Result<Option<EmbeddedExtent>> {
    if !is_macho_magic(bytes) {
        return Ok(None);
    }
    let magic = LittleEndian::read_u32(&bytes[..4]);

    if magic == MH_CIGAM || magic == MH_CIGAM_64 {
        return Err(anyhow!(
            "unexpected Mach-O layout: byte-swapped headers are not supported"
        ));
    }
    if magic == MH_MAGIC {
        return Err(anyhow!(
            "32-bit Mach-O binary: only 64-bit architectures are supported"
        ));
    }

    let ncmds = read_u32(bytes, MH_OFF_NCMDS)?;
    let mut off = MACH_HEADER_64_SIZE;

    for _ in 0..ncmds {
        let cmd = read_u32(bytes, off)?;
        let cmdsize = read_u32(bytes, off + 4)? as usize;
        if cmdsize < LOAD_COMMAND_SIZE {
            return Err(anyhow!("malformed load command: cmdsize {} too small", cmdsize));
        }
        let cmd_end = off
            .checked_add(cmdsize)
            .ok_or_else(|| anyhow!("load command size overflows"))?;
        if cmd_end > bytes.len() {
            return Err(anyhow!(
                "load command [{}, {}) past end of buffer ({})",
                off,
                cmd_end,
                bytes.len()
            ));
        }

        // Only 64-bit segments can carry the section; everything else is
        // skipped wholesale via cmdsize.
        if cmd == LC_SEGMENT_64 {
            if cmdsize < SEGMENT_COMMAND_64_SIZE {
                return Err(anyhow!(
                    "malformed segment command: cmdsize {} below segment_command_64",
                    cmdsize
                ));
            }
            let nsects = read_u32(bytes, off + SEG_OFF_NSECTS)? as usize;
            let sects_len = nsects
                .checked_mul(SECTION_64_SIZE)
                .and_then(|n| n.checked_add(SEGMENT_COMMAND_64_SIZE))
                .ok_or_else(|| anyhow!("section count overflows"))?;
            if sects_len > cmdsize {
                return Err(anyhow!(
                    "segment declares {} sections which exceed its cmdsize {}",
                    nsects,
                    cmdsize
                ));
            }

            for j in 0..nsects {
                let s = off + SEGMENT_COMMAND_64_SIZE + j * SECTION_64_SIZE;
                let sectname = &bytes[s + SECT_OFF_SECTNAME..s + SECT_OFF_SECTNAME + 16];
                let segname = &bytes[s + SECT_OFF_SEGNAME..s + SECT_OFF_SEGNAME + 16];
                if name_eq(segname, MACHO_SNAPSHOT_SEGMENT) && name_eq(sectname, MACHO_SNAPSHOT_SECTION) {
                    let size = read_u64(bytes, s + SECT_OFF_SIZE)?;
                    let offset = read_u32(bytes, s + SECT_OFF_OFFSET)? as u64;
                    return Ok(Some(EmbeddedExtent { offset, size }));
                }
            }
        }

        off = cmd_end;
    }

    Ok(None)
}
