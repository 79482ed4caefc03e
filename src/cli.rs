use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::blob::{self, compute_layout, SectionSet};
use crate::macho;
use crate::probe;

#[derive(Parser, Debug)]
#[command(
    name = "appsnap",
    version,
    about = "App snapshot containers: pack, unpack and inspect",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Build a blob container from up to four section files.
    Pack {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        vm_data: Option<PathBuf>,
        #[arg(long)]
        vm_instructions: Option<PathBuf>,
        #[arg(long)]
        isolate_data: Option<PathBuf>,
        #[arg(long)]
        isolate_instructions: Option<PathBuf>,
    },
    /// Extract the sections of a blob container into a directory.
    Unpack {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Report how (if at all) a file carries a snapshot.
    Inspect {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize, Debug)]
struct SectionReport {
    offset: u64,
    size: u64,
}

#[derive(Serialize, Debug)]
struct BlobReport {
    vm_data: Option<SectionReport>,
    vm_instructions: Option<SectionReport>,
    isolate_data: Option<SectionReport>,
    isolate_instructions: Option<SectionReport>,
}

#[derive(Serialize, Debug)]
struct InspectReport {
    path: String,
    /// blob | macho | trailer | none
    format: String,
    blob: Option<BlobReport>,
    embedded_offset: Option<u64>,
    embedded_size: Option<u64>,
    trailer_offset: Option<u64>,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Pack {
            out,
            vm_data,
            vm_instructions,
            isolate_data,
            isolate_instructions,
        } => cmd_pack(&out, vm_data, vm_instructions, isolate_data, isolate_instructions),
        Cmd::Unpack { path, out_dir } => cmd_unpack(&path, &out_dir),
        Cmd::Inspect { path, json } => cmd_inspect(&path, json),
    }
}

fn read_opt(path: &Option<PathBuf>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(p) => Ok(Some(fs::read(p).map_err(|e| anyhow!("read section {}: {}", p.display(), e))?)),
        None => Ok(None),
    }
}

fn cmd_pack(
    out: &Path,
    vm_data: Option<PathBuf>,
    vm_instructions: Option<PathBuf>,
    isolate_data: Option<PathBuf>,
    isolate_instructions: Option<PathBuf>,
) -> Result<()> {
    let vm_data = read_opt(&vm_data)?;
    let vm_instructions = read_opt(&vm_instructions)?;
    let isolate_data = read_opt(&isolate_data)?;
    let isolate_instructions = read_opt(&isolate_instructions)?;

    blob::write_snapshot_blob(
        out,
        &SectionSet {
            vm_data: vm_data.as_deref(),
            vm_instructions: vm_instructions.as_deref(),
            isolate_data: isolate_data.as_deref(),
            isolate_instructions: isolate_instructions.as_deref(),
        },
    )?;
    println!("packed {}", out.display());
    Ok(())
}

fn cmd_unpack(path: &Path, out_dir: &Path) -> Result<()> {
    let mapped = blob::try_read_mapped_snapshot(path)?
        .ok_or_else(|| anyhow!("{} is not a snapshot blob container", path.display()))?;

    fs::create_dir_all(out_dir)?;
    let dump = |name: &str, section: Option<&[u8]>| -> Result<()> {
        if let Some(bytes) = section {
            let p = out_dir.join(name);
            fs::write(&p, bytes)?;
            println!("{} ({} bytes)", p.display(), bytes.len());
        }
        Ok(())
    };
    dump("vm_data.bin", mapped.vm_data())?;
    dump("vm_instructions.bin", mapped.vm_instructions())?;
    dump("isolate_data.bin", mapped.isolate_data())?;
    dump("isolate_instructions.bin", mapped.isolate_instructions())?;
    Ok(())
}

fn section_report(e: blob::SectionExtent) -> Option<SectionReport> {
    e.is_present().then_some(SectionReport {
        offset: e.offset,
        size: e.size,
    })
}

fn cmd_inspect(path: &Path, json: bool) -> Result<()> {
    let mut report = InspectReport {
        path: path.display().to_string(),
        format: "none".to_string(),
        blob: None,
        embedded_offset: None,
        embedded_size: None,
        trailer_offset: None,
    };

    let mut f = fs::File::open(path).map_err(|e| anyhow!("open {}: {}", path.display(), e))?;
    if let Some(header) = blob::read_snapshot_header(&mut f)? {
        let layout = compute_layout(&header)?;
        report.format = "blob".to_string();
        report.blob = Some(BlobReport {
            vm_data: section_report(layout.vm_data),
            vm_instructions: section_report(layout.vm_instructions),
            isolate_data: section_report(layout.isolate_data),
            isolate_instructions: section_report(layout.isolate_instructions),
        });
    } else if probe::is_macho_file(path) {
        // An unsupported header (32-bit, swapped) is a real diagnostic here,
        // not a silent "none".
        let bytes = fs::read(path)?;
        if let Some(extent) = macho::find_snapshot_section(&bytes)? {
            report.format = "macho".to_string();
            report.embedded_offset = Some(extent.offset);
            report.embedded_size = Some(extent.size);
        }
    } else if let Some(offset) = probe::read_appended_trailer(path)? {
        report.format = "trailer".to_string();
        report.trailer_offset = Some(offset);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(r: &InspectReport) {
    println!("{}: {}", r.path, r.format);
    if let Some(b) = &r.blob {
        let line = |name: &str, s: &Option<SectionReport>| match s {
            Some(s) => println!("  {:<24} offset={:#x} size={}", name, s.offset, s.size),
            None => println!("  {:<24} absent", name),
        };
        line("vm data", &b.vm_data);
        line("vm instructions", &b.vm_instructions);
        line("isolate data", &b.isolate_data);
        line("isolate instructions", &b.isolate_instructions);
    }
    if let (Some(off), Some(size)) = (r.embedded_offset, r.embedded_size) {
        println!("  embedded image offset={:#x} size={}", off, size);
    }
    if let Some(off) = r.trailer_offset {
        println!("  appended image offset={:#x}", off);
    }
}
