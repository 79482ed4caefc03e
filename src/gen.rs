//! Snapshot production.
//!
//! The compiler front end and the engine's image-producing API are external
//! collaborators; they are consumed through the traits below. This module
//! owns what happens to their output: kernel dumps, blob containers, and
//! streamed assembly.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::blob::{write_snapshot_blob, SectionSet};

/// Compiler-reported failure. Kept as a distinct type inside `anyhow` so the
/// binary can exit with the compilation-specific status code.
#[derive(Debug)]
pub struct CompilationError(pub String);

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CompilationError {}

/// Script/kernel compiler front end (external collaborator).
pub trait KernelCompiler {
    /// The script bytes when the input is already a compiled kernel,
    /// letting `generate_kernel` skip compilation entirely.
    fn read_script(&self, script: &Path) -> Option<Vec<u8>> {
        let _ = script;
        None
    }

    /// Compile `script` to a kernel buffer; `Err` carries the compiler's
    /// textual diagnostic.
    fn compile(&self, script: &Path, package_config: Option<&Path>) -> std::result::Result<Vec<u8>, String>;
}

/// App-JIT output of the engine: isolate scope only, vm sections absent.
pub struct JitSections {
    pub isolate_data: Vec<u8>,
    pub isolate_instructions: Vec<u8>,
}

/// Engine image-producing API (external collaborator).
pub trait ImageProducer {
    fn create_app_jit(&self) -> std::result::Result<JitSections, String>;

    /// Push-style assembly emission into the given sink.
    fn write_aot_assembly(&self, out: &mut dyn Write) -> std::result::Result<(), String>;
}

/// Dump raw snapshot/kernel bytes to `path`. Any failure is fatal.
pub fn write_snapshot_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("unable to open {} for writing snapshot", path.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("unable to write snapshot file {}", path.display()))?;
    Ok(())
}

/// Produce a kernel file for `script`: reuse it verbatim when it is already
/// compiled, otherwise run the compiler. Compiler failures surface as
/// `CompilationError`.
pub fn generate_kernel(
    compiler: &dyn KernelCompiler,
    out: &Path,
    script: &Path,
    package_config: Option<&Path>,
) -> Result<()> {
    if let Some(kernel) = compiler.read_script(script) {
        return write_snapshot_file(out, &kernel);
    }
    match compiler.compile(script, package_config) {
        Ok(kernel) => write_snapshot_file(out, &kernel),
        Err(msg) => Err(CompilationError(msg).into()),
    }
}

/// Produce an app-JIT blob container (vm sections absent).
pub fn generate_app_jit(engine: &dyn ImageProducer, out: &Path) -> Result<()> {
    let jit = engine
        .create_app_jit()
        .map_err(|msg| anyhow::anyhow!("app-jit snapshot creation failed: {}", msg))?;
    write_snapshot_blob(
        out,
        &SectionSet {
            isolate_data: Some(&jit.isolate_data),
            isolate_instructions: Some(&jit.isolate_instructions),
            ..SectionSet::default()
        },
    )
}

/// Stream AOT assembly output straight into `out`.
pub fn generate_aot_assembly(engine: &dyn ImageProducer, out: &Path) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(out)
        .with_context(|| format!("unable to open {} for writing snapshot", out.display()))?;
    engine
        .write_aot_assembly(&mut f)
        .map_err(|msg| anyhow::anyhow!("unable to write snapshot file {}: {}", out.display(), msg))?;
    Ok(())
}

/// True when `path` starts with the ELF magic, i.e. is an AOT image rather
/// than a JIT blob container.
pub fn is_aot_snapshot(path: &Path) -> bool {
    const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut head = [0u8; 4];
            std::io::Read::read_exact(&mut f, &mut head).is_ok() && &head == ELF_MAGIC
        }
        Err(_) => false,
    }
}
