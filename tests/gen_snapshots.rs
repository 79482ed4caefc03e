use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use appsnap::blob::try_read_snapshot_blob;
use appsnap::gen::{
    generate_aot_assembly, generate_app_jit, generate_kernel, is_aot_snapshot, write_snapshot_file,
    CompilationError, ImageProducer, JitSections, KernelCompiler,
};
use appsnap::snapshot::AppSnapshot;

struct FakeCompiler {
    precompiled: Option<Vec<u8>>,
    result: std::result::Result<Vec<u8>, String>,
}

impl KernelCompiler for FakeCompiler {
    fn read_script(&self, _script: &Path) -> Option<Vec<u8>> {
        self.precompiled.clone()
    }

    fn compile(&self, _script: &Path, _package_config: Option<&Path>) -> std::result::Result<Vec<u8>, String> {
        self.result.clone()
    }
}

struct FakeEngine {
    jit: std::result::Result<(Vec<u8>, Vec<u8>), String>,
    assembly: Vec<u8>,
}

impl ImageProducer for FakeEngine {
    fn create_app_jit(&self) -> std::result::Result<JitSections, String> {
        self.jit.clone().map(|(d, i)| JitSections {
            isolate_data: d,
            isolate_instructions: i,
        })
    }

    fn write_aot_assembly(&self, out: &mut dyn Write) -> std::result::Result<(), String> {
        // Streamed in chunks, like the engine's push-style callback.
        for chunk in self.assembly.chunks(7) {
            out.write_all(chunk).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[test]
fn kernel_from_compiler_output() -> Result<()> {
    let root = unique_root("gen-kernel");
    fs::create_dir_all(&root)?;
    let out = root.join("app.dill");

    let compiler = FakeCompiler {
        precompiled: None,
        result: Ok(b"kernel bytes".to_vec()),
    };
    generate_kernel(&compiler, &out, &root.join("main.src"), None)?;
    assert_eq!(fs::read(&out)?, b"kernel bytes");
    Ok(())
}

#[test]
fn precompiled_script_skips_compiler() -> Result<()> {
    let root = unique_root("gen-precompiled");
    fs::create_dir_all(&root)?;
    let out = root.join("app.dill");

    let compiler = FakeCompiler {
        precompiled: Some(b"already a kernel".to_vec()),
        result: Err("compiler must not run".to_string()),
    };
    generate_kernel(&compiler, &out, &root.join("main.src"), None)?;
    assert_eq!(fs::read(&out)?, b"already a kernel");
    Ok(())
}

#[test]
fn compiler_failure_is_compilation_error() -> Result<()> {
    let root = unique_root("gen-compfail");
    fs::create_dir_all(&root)?;
    let out = root.join("app.dill");

    let compiler = FakeCompiler {
        precompiled: None,
        result: Err("main.src:3: unexpected token".to_string()),
    };
    let err = generate_kernel(&compiler, &out, &root.join("main.src"), None).unwrap_err();
    let comp = err
        .downcast_ref::<CompilationError>()
        .expect("must carry CompilationError for the exit-code split");
    assert!(comp.0.contains("unexpected token"));
    assert!(!out.exists());
    Ok(())
}

#[test]
fn app_jit_roundtrips_as_blob() -> Result<()> {
    let root = unique_root("gen-jit");
    fs::create_dir_all(&root)?;
    let out = root.join("app.jit");

    let engine = FakeEngine {
        jit: Ok((vec![0xAA; 300], vec![0xBB; 200])),
        assembly: Vec::new(),
    };
    generate_app_jit(&engine, &out)?;

    let snap = try_read_snapshot_blob(&out)?.expect("app-jit output is a blob container");
    let mapped = match &snap {
        AppSnapshot::Mapped(m) => m,
        other => panic!("expected mapped snapshot, got {}", other.kind()),
    };
    assert!(mapped.vm_data().is_none());
    assert!(mapped.vm_instructions().is_none());
    assert_eq!(mapped.isolate_data().unwrap(), &vec![0xAA; 300][..]);
    assert_eq!(mapped.isolate_instructions().unwrap(), &vec![0xBB; 200][..]);
    Ok(())
}

#[test]
fn aot_assembly_is_streamed() -> Result<()> {
    let root = unique_root("gen-asm");
    fs::create_dir_all(&root)?;
    let out = root.join("app.S");

    let assembly = b".text\n.globl ImageSnapshot\nImageSnapshot:\n".to_vec();
    let engine = FakeEngine {
        jit: Err("unused".to_string()),
        assembly: assembly.clone(),
    };
    generate_aot_assembly(&engine, &out)?;
    assert_eq!(fs::read(&out)?, assembly);
    Ok(())
}

#[test]
fn aot_sniff_checks_elf_magic() -> Result<()> {
    let root = unique_root("gen-sniff");
    fs::create_dir_all(&root)?;

    let elf = root.join("app.aot");
    write_snapshot_file(&elf, b"\x7fELF\x02\x01\x01\x00rest-of-image")?;
    assert!(is_aot_snapshot(&elf));

    let blob = root.join("app.jit");
    let engine = FakeEngine {
        jit: Ok((vec![1], vec![2])),
        assembly: Vec::new(),
    };
    generate_app_jit(&engine, &blob)?;
    assert!(!is_aot_snapshot(&blob));

    assert!(!is_aot_snapshot(&root.join("missing.aot")));
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("appsnap-{}-{}-{}", prefix, pid, t))
}
