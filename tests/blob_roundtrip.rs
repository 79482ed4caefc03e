use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::path::PathBuf;

use appsnap::blob::{try_read_snapshot_blob, write_snapshot_blob, SectionSet};
use appsnap::consts::{SNAPSHOT_HEADER_SIZE, SNAPSHOT_MAGIC};
use appsnap::snapshot::AppSnapshot;

#[test]
fn isolate_only_scenario() -> Result<()> {
    let root = unique_root("iso-only");
    fs::create_dir_all(&root)?;
    let path = root.join("app.snapshot");

    let iso_data = vec![0xAB; 100];
    let iso_instr = vec![0xCD; 50];
    write_snapshot_blob(
        &path,
        &SectionSet {
            isolate_data: Some(&iso_data),
            isolate_instructions: Some(&iso_instr),
            ..SectionSet::default()
        },
    )?;

    let snap = try_read_snapshot_blob(&path)?.expect("must parse as blob");
    let mapped = match &snap {
        AppSnapshot::Mapped(m) => m,
        other => panic!("expected mapped snapshot, got {}", other.kind()),
    };

    assert!(mapped.vm_data().is_none());
    assert!(mapped.vm_instructions().is_none());
    let got_data = mapped.isolate_data().expect("isolate data present");
    assert_eq!(got_data.len(), 100);
    assert!(got_data.iter().all(|&b| b == 0xAB));
    let got_instr = mapped.isolate_instructions().expect("isolate instructions present");
    assert_eq!(got_instr.len(), 50);
    assert!(got_instr.iter().all(|&b| b == 0xCD));

    let bufs = snap.buffers();
    assert!(bufs.vm_data.is_null());
    assert!(bufs.vm_instructions.is_null());
    assert!(!bufs.isolate_data.is_null());
    assert!(!bufs.isolate_instructions.is_null());
    Ok(())
}

#[test]
fn roundtrip_size_grid() -> Result<()> {
    let root = unique_root("grid");
    fs::create_dir_all(&root)?;
    let path = root.join("grid.snapshot");

    // Page-boundary-straddling sizes in every combination.
    let grid: [u64; 5] = [0, 1, 16383, 16384, 16385];
    let mut rng = oorandom::Rand32::new(0x5eed);
    let mut fill = |len: u64| -> Vec<u8> { (0..len).map(|_| rng.rand_u32() as u8).collect() };

    for &a in &grid {
        for &b in &grid {
            for &c in &grid {
                for &d in &grid {
                    let vm_data = fill(a);
                    let vm_instr = fill(b);
                    let iso_data = fill(c);
                    let iso_instr = fill(d);

                    write_snapshot_blob(
                        &path,
                        &SectionSet {
                            vm_data: present(&vm_data),
                            vm_instructions: present(&vm_instr),
                            isolate_data: present(&iso_data),
                            isolate_instructions: present(&iso_instr),
                        },
                    )?;

                    let snap = try_read_snapshot_blob(&path)?.expect("container must parse");
                    let mapped = match &snap {
                        AppSnapshot::Mapped(m) => m,
                        other => panic!("expected mapped snapshot, got {}", other.kind()),
                    };

                    let check = |name: &str, want: &[u8], got: Option<&[u8]>| {
                        if want.is_empty() {
                            assert!(got.is_none(), "{} must be absent for {:?}", name, (a, b, c, d));
                        } else {
                            let got = got.unwrap_or_else(|| panic!("{} missing for {:?}", name, (a, b, c, d)));
                            assert_eq!(got, want, "{} bytes differ for {:?}", name, (a, b, c, d));
                        }
                    };
                    check("vm_data", &vm_data, mapped.vm_data());
                    check("vm_instructions", &vm_instr, mapped.vm_instructions());
                    check("isolate_data", &iso_data, mapped.isolate_data());
                    check("isolate_instructions", &iso_instr, mapped.isolate_instructions());

                    drop(snap); // unmap before the next overwrite
                }
            }
        }
    }
    Ok(())
}

#[test]
fn short_file_is_soft_miss() -> Result<()> {
    let root = unique_root("short");
    fs::create_dir_all(&root)?;
    let path = root.join("short.bin");
    fs::write(&path, &vec![0u8; SNAPSHOT_HEADER_SIZE as usize - 1])?;
    assert!(try_read_snapshot_blob(&path)?.is_none());

    fs::write(&path, b"")?;
    assert!(try_read_snapshot_blob(&path)?.is_none());
    Ok(())
}

#[test]
fn wrong_magic_is_soft_miss() -> Result<()> {
    let root = unique_root("magic");
    fs::create_dir_all(&root)?;
    let path = root.join("notsnap.bin");
    let mut bytes = vec![0u8; 64 * 1024];
    bytes[..8].copy_from_slice(b"WRONGMAG");
    fs::write(&path, &bytes)?;
    assert!(try_read_snapshot_blob(&path)?.is_none());
    Ok(())
}

#[test]
fn truncated_declared_section_is_fatal() -> Result<()> {
    let root = unique_root("trunc");
    fs::create_dir_all(&root)?;
    let path = root.join("trunc.snapshot");

    let iso_data = vec![0x11; 4096];
    write_snapshot_blob(
        &path,
        &SectionSet {
            isolate_data: Some(&iso_data),
            ..SectionSet::default()
        },
    )?;

    // Chop off the tail of the declared isolate-data section. The header
    // still promises 4096 bytes, so the reader must fail, not fall back.
    let full = fs::read(&path)?;
    fs::write(&path, &full[..full.len() - 100])?;
    assert!(try_read_snapshot_blob(&path).is_err());
    Ok(())
}

#[test]
fn huge_declared_sizes_are_fatal_not_panic() -> Result<()> {
    let root = unique_root("huge");
    fs::create_dir_all(&root)?;
    let path = root.join("huge.snapshot");

    // Header-only file whose vm sizes sum past u64::MAX once page padding
    // is added. The magic matched, so this must be a structural error.
    let mut buf = Vec::with_capacity(SNAPSHOT_HEADER_SIZE as usize);
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    for _ in 0..2 {
        let mut word = [0u8; 8];
        LittleEndian::write_i64(&mut word, i64::MAX);
        buf.extend_from_slice(&word);
    }
    buf.extend_from_slice(&[0u8; 16]);
    fs::write(&path, &buf)?;

    assert!(try_read_snapshot_blob(&path).is_err());
    Ok(())
}

#[test]
fn header_only_container_is_valid_and_empty() -> Result<()> {
    let root = unique_root("empty");
    fs::create_dir_all(&root)?;
    let path = root.join("empty.snapshot");

    write_snapshot_blob(&path, &SectionSet::default())?;
    assert_eq!(fs::read(&path)?.len(), SNAPSHOT_HEADER_SIZE as usize);
    assert_eq!(&fs::read(&path)?[..8], SNAPSHOT_MAGIC);

    let snap = try_read_snapshot_blob(&path)?.expect("header-only container still parses");
    let bufs = snap.buffers();
    assert!(bufs.vm_data.is_null());
    assert!(bufs.vm_instructions.is_null());
    assert!(bufs.isolate_data.is_null());
    assert!(bufs.isolate_instructions.is_null());
    Ok(())
}

fn present(v: &[u8]) -> Option<&[u8]> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("appsnap-{}-{}-{}", prefix, pid, t))
}
