//! Blob container codec.
//!
//! File layout (LE):
//!   [magic8 = "APSNAP01"]
//!   [vm_data_size i64][vm_instructions_size i64]
//!   [isolate_data_size i64][isolate_instructions_size i64]
//!   then each present section in that order, placed per `compute_layout`.
//!
//! Placement mirrors the writer the engine has always used:
//! - vm-data starts at the first 16 KiB boundary after the header;
//! - vm-instructions is aligned only when present;
//! - isolate-data is aligned unconditionally;
//! - isolate-instructions is aligned only when present.
//! Absent sections (size 0) emit no bytes and no padding of their own.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::debug;

use crate::consts::{SNAPSHOT_HEADER_SIZE, SNAPSHOT_MAGIC};
use crate::mapping::{map_region, MapPerm, MappedRegion};
use crate::snapshot::{AppSnapshot, MappedSnapshot};
use crate::util::page_align;

/// Decoded blob header: the four declared section sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub vm_data_size: u64,
    pub vm_instructions_size: u64,
    pub isolate_data_size: u64,
    pub isolate_instructions_size: u64,
}

impl SnapshotHeader {
    /// Decode the 40-byte header.
    ///
    /// Magic mismatch is a soft miss (`Ok(None)`): the file is simply not a
    /// blob container. A negative declared size, on the other hand, means
    /// the file matched the format and then broke its contract.
    pub fn decode(buf: &[u8; SNAPSHOT_HEADER_SIZE as usize]) -> Result<Option<Self>> {
        if &buf[..8] != SNAPSHOT_MAGIC {
            return Ok(None);
        }
        let mut sizes = [0u64; 4];
        for (i, s) in sizes.iter_mut().enumerate() {
            let raw = LittleEndian::read_i64(&buf[8 + i * 8..16 + i * 8]);
            if raw < 0 {
                return Err(anyhow!("blob header declares negative section size {}", raw));
            }
            *s = raw as u64;
        }
        Ok(Some(Self {
            vm_data_size: sizes[0],
            vm_instructions_size: sizes[1],
            isolate_data_size: sizes[2],
            isolate_instructions_size: sizes[3],
        }))
    }

    pub fn encode(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(SNAPSHOT_MAGIC)?;
        w.write_i64::<LittleEndian>(self.vm_data_size as i64)?;
        w.write_i64::<LittleEndian>(self.vm_instructions_size as i64)?;
        w.write_i64::<LittleEndian>(self.isolate_data_size as i64)?;
        w.write_i64::<LittleEndian>(self.isolate_instructions_size as i64)?;
        Ok(())
    }
}

/// (offset, size) of one section; `size == 0` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionExtent {
    pub offset: u64,
    pub size: u64,
}

impl SectionExtent {
    #[inline]
    pub fn is_present(&self) -> bool {
        self.size != 0
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Page-aligned placement of the four sections, derived from the header.
#[derive(Debug, Clone, Copy)]
pub struct SectionLayout {
    pub vm_data: SectionExtent,
    pub vm_instructions: SectionExtent,
    pub isolate_data: SectionExtent,
    pub isolate_instructions: SectionExtent,
}

impl SectionLayout {
    /// Present extents, in file order.
    pub fn present(&self) -> impl Iterator<Item = SectionExtent> {
        [
            self.vm_data,
            self.vm_instructions,
            self.isolate_data,
            self.isolate_instructions,
        ]
        .into_iter()
        .filter(|e| e.is_present())
    }
}

/// Sequential placement, identical for writer and reader.
///
/// Offsets of absent sections are the raw running cursor; only present
/// sections are guaranteed to land on a 16 KiB boundary. A header whose
/// declared sizes overflow the running cursor is structurally invalid:
/// the sizes came from a matched magic, so this is `Err`, not a miss.
pub fn compute_layout(h: &SnapshotHeader) -> Result<SectionLayout> {
    fn overflow() -> anyhow::Error {
        anyhow!("blob header section sizes overflow the container layout")
    }
    let align = |pos: u64| page_align(pos).ok_or_else(overflow);
    let advance = |off: u64, size: u64| off.checked_add(size).ok_or_else(overflow);

    let vm_data_off = align(SNAPSHOT_HEADER_SIZE)?;

    let mut pos = advance(vm_data_off, h.vm_data_size)?;
    let vm_instr_off = if h.vm_instructions_size != 0 { align(pos)? } else { pos };

    pos = advance(vm_instr_off, h.vm_instructions_size)?;
    let iso_data_off = align(pos)?;

    pos = advance(iso_data_off, h.isolate_data_size)?;
    let iso_instr_off = if h.isolate_instructions_size != 0 { align(pos)? } else { pos };
    // The last section's end must be representable too, so `end()` stays
    // total on every extent this function hands out.
    advance(iso_instr_off, h.isolate_instructions_size)?;

    Ok(SectionLayout {
        vm_data: SectionExtent {
            offset: vm_data_off,
            size: h.vm_data_size,
        },
        vm_instructions: SectionExtent {
            offset: vm_instr_off,
            size: h.vm_instructions_size,
        },
        isolate_data: SectionExtent {
            offset: iso_data_off,
            size: h.isolate_data_size,
        },
        isolate_instructions: SectionExtent {
            offset: iso_instr_off,
            size: h.isolate_instructions_size,
        },
    })
}

/// Input to the writer: any section may be absent.
#[derive(Default, Clone, Copy)]
pub struct SectionSet<'a> {
    pub vm_data: Option<&'a [u8]>,
    pub vm_instructions: Option<&'a [u8]>,
    pub isolate_data: Option<&'a [u8]>,
    pub isolate_instructions: Option<&'a [u8]>,
}

impl<'a> SectionSet<'a> {
    fn len_of(s: Option<&[u8]>) -> u64 {
        s.map(|b| b.len() as u64).unwrap_or(0)
    }

    pub fn header(&self) -> SnapshotHeader {
        SnapshotHeader {
            vm_data_size: Self::len_of(self.vm_data),
            vm_instructions_size: Self::len_of(self.vm_instructions),
            isolate_data_size: Self::len_of(self.isolate_data),
            isolate_instructions_size: Self::len_of(self.isolate_instructions),
        }
    }
}

fn write_section(f: &mut File, extent: SectionExtent, bytes: &[u8], label: &str) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    debug!("{:#x}: {}", extent.offset, label);
    f.seek(SeekFrom::Start(extent.offset))?;
    f.write_all(bytes)?;
    Ok(())
}

/// Write a blob container. Any failure is fatal to the calling operation;
/// no partial-file cleanup is attempted.
pub fn write_snapshot_blob(path: &Path, sections: &SectionSet<'_>) -> Result<()> {
    let header = sections.header();
    let layout = compute_layout(&header)?;

    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("open snapshot file {} for writing", path.display()))?;

    header.encode(&mut f)?;

    write_section(&mut f, layout.vm_data, sections.vm_data.unwrap_or(&[]), "vm data")?;
    write_section(
        &mut f,
        layout.vm_instructions,
        sections.vm_instructions.unwrap_or(&[]),
        "vm instructions",
    )?;
    write_section(
        &mut f,
        layout.isolate_data,
        sections.isolate_data.unwrap_or(&[]),
        "isolate data",
    )?;
    write_section(
        &mut f,
        layout.isolate_instructions,
        sections.isolate_instructions.unwrap_or(&[]),
        "isolate instructions",
    )?;

    f.sync_all()
        .with_context(|| format!("sync snapshot file {}", path.display()))?;
    Ok(())
}

/// Read the 40-byte header off an open container.
///
/// `Ok(None)`: too short, or not our magic. `Err`: matched the magic but the
/// sizes are invalid.
pub fn read_snapshot_header(f: &mut File) -> Result<Option<SnapshotHeader>> {
    let len = f.metadata()?.len();
    if len < SNAPSHOT_HEADER_SIZE {
        return Ok(None);
    }
    let mut buf = [0u8; SNAPSHOT_HEADER_SIZE as usize];
    f.seek(SeekFrom::Start(0))?;
    f.read_exact(&mut buf)?;
    SnapshotHeader::decode(&buf)
}

/// Try to read `path` as a blob container, keeping the concrete mapped type.
///
/// Soft miss (`Ok(None)`) when the file does not carry the format; fatal
/// (`Err`) when the header is valid but a declared section cannot be mapped,
/// since the header promised the section exists.
pub fn try_read_mapped_snapshot(path: &Path) -> Result<Option<MappedSnapshot>> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("blob: cannot open {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let header = match read_snapshot_header(&mut f)? {
        Some(h) => h,
        None => return Ok(None),
    };
    let layout = compute_layout(&header)?;

    let map_opt = |extent: SectionExtent, perm: MapPerm| -> Result<Option<MappedRegion>> {
        if !extent.is_present() {
            return Ok(None);
        }
        map_region(&f, path, perm, extent.offset, extent.size).map(Some)
    };

    let vm_data = map_opt(layout.vm_data, MapPerm::Read)?;
    let vm_instructions = map_opt(layout.vm_instructions, MapPerm::ReadExec)?;
    let isolate_data = map_opt(layout.isolate_data, MapPerm::Read)?;
    let isolate_instructions = map_opt(layout.isolate_instructions, MapPerm::ReadExec)?;

    Ok(Some(MappedSnapshot::new(
        vm_data,
        vm_instructions,
        isolate_data,
        isolate_instructions,
    )))
}

/// Strategy entry point used by the resolver.
pub fn try_read_snapshot_blob(path: &Path) -> Result<Option<AppSnapshot>> {
    Ok(try_read_mapped_snapshot(path)?.map(AppSnapshot::Mapped))
}
