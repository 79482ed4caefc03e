//! Dynamic-library snapshot strategy.
//!
//! Opens the script path as a shared library and resolves the four
//! well-known section symbols straight out of process memory. An open
//! failure is a soft miss (the file is simply not a loadable library); a
//! library that loads but lacks either isolate-scope symbol is structurally
//! invalid for this purpose and fails hard.

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::path::Path;

use anyhow::{anyhow, Result};
use log::debug;

use crate::consts::{
    ISOLATE_SNAPSHOT_DATA_SYMBOL, ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL, VM_SNAPSHOT_DATA_SYMBOL,
    VM_SNAPSHOT_INSTRUCTIONS_SYMBOL,
};
use crate::snapshot::{AppSnapshot, SnapshotBuffers};

/// RAII handle to a loaded shared library. Unloaded on drop.
pub struct DynLib {
    handle: *mut c_void,
}

impl DynLib {
    /// Open a shared library; the error carries the loader's diagnostic.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .to_str()
            .ok_or_else(|| anyhow!("non-UTF-8 library path {}", path.display()))?;
        let cname = CString::new(name)?;

        #[cfg(unix)]
        {
            let handle = unsafe { dlopen(cname.as_ptr(), RTLD_NOW | RTLD_LOCAL) };
            if handle.is_null() {
                let err = unsafe { dlerror() };
                let msg = if err.is_null() {
                    "unknown dlopen error".to_string()
                } else {
                    unsafe { std::ffi::CStr::from_ptr(err) }
                        .to_string_lossy()
                        .into_owned()
                };
                return Err(anyhow!(msg));
            }
            Ok(Self { handle })
        }

        #[cfg(windows)]
        {
            let handle = unsafe { LoadLibraryA(cname.as_ptr()) };
            if handle.is_null() {
                return Err(anyhow!("LoadLibraryA failed for {}", name));
            }
            Ok(Self {
                handle: handle as *mut c_void,
            })
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = cname;
            Err(anyhow!("dynamic library loading not supported on this platform"))
        }
    }

    /// Resolve a data symbol; `None` when the library does not export it.
    pub fn sym(&self, name: &str) -> Option<*const u8> {
        let cname = CString::new(name).ok()?;

        #[cfg(unix)]
        {
            unsafe {
                dlerror(); // clear any stale error
                let ptr = dlsym(self.handle, cname.as_ptr());
                if !dlerror().is_null() || ptr.is_null() {
                    return None;
                }
                Some(ptr as *const u8)
            }
        }

        #[cfg(windows)]
        {
            let ptr = unsafe { GetProcAddress(self.handle as _, cname.as_ptr()) };
            if ptr.is_null() {
                None
            } else {
                Some(ptr as *const u8)
            }
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = cname;
            None
        }
    }
}

impl Drop for DynLib {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            #[cfg(unix)]
            unsafe {
                dlclose(self.handle);
            }

            #[cfg(windows)]
            unsafe {
                FreeLibrary(self.handle as _);
            }
        }
    }
}

#[cfg(unix)]
const RTLD_NOW: i32 = 2;
#[cfg(unix)]
const RTLD_LOCAL: i32 = 0;

#[cfg(unix)]
extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn dlclose(handle: *mut c_void) -> i32;
    fn dlerror() -> *const c_char;
}

#[cfg(windows)]
extern "system" {
    fn LoadLibraryA(name: *const c_char) -> *mut c_void;
    fn GetProcAddress(module: *mut c_void, name: *const c_char) -> *mut c_void;
    fn FreeLibrary(module: *mut c_void) -> i32;
}

/// Library-backed snapshot: buffers stay valid while the library is loaded.
pub struct DylibSnapshot {
    _lib: DynLib,
    buffers: SnapshotBuffers,
}

impl DylibSnapshot {
    pub fn buffers(&self) -> SnapshotBuffers {
        self.buffers
    }
}

/// Apply the symbol rules to any lookup source.
///
/// The vm pair is optional and may come back null; the isolate pair is
/// mandatory — the library was found but violates the snapshot contract if
/// either is missing.
fn buffers_from_symbols(mut lookup: impl FnMut(&str) -> Option<*const u8>) -> Result<SnapshotBuffers> {
    let vm_data = lookup(VM_SNAPSHOT_DATA_SYMBOL).unwrap_or(std::ptr::null());
    let vm_instructions = lookup(VM_SNAPSHOT_INSTRUCTIONS_SYMBOL).unwrap_or(std::ptr::null());

    let isolate_data = lookup(ISOLATE_SNAPSHOT_DATA_SYMBOL)
        .ok_or_else(|| anyhow!("failed to resolve symbol '{}'", ISOLATE_SNAPSHOT_DATA_SYMBOL))?;
    let isolate_instructions = lookup(ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL).ok_or_else(|| {
        anyhow!(
            "failed to resolve symbol '{}'",
            ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL
        )
    })?;

    Ok(SnapshotBuffers {
        vm_data,
        vm_instructions,
        isolate_data,
        isolate_instructions,
    })
}

/// Try to read `path` as a snapshot shared library.
pub fn try_read_snapshot_dylib(path: &Path) -> Result<Option<AppSnapshot>> {
    let lib = match DynLib::open(path) {
        Ok(lib) => lib,
        Err(e) => {
            debug!("dylib: open {} failed: {}", path.display(), e);
            return Ok(None);
        }
    };

    let buffers = buffers_from_symbols(|name| lib.sym(name))?;
    Ok(Some(AppSnapshot::Library(DylibSnapshot {
        _lib: lib,
        buffers,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table(entries: &[(&'static str, *const u8)]) -> HashMap<&'static str, *const u8> {
        entries.iter().copied().collect()
    }

    #[test]
    fn isolate_only_is_enough() {
        static ISO_DATA: [u8; 4] = [1, 2, 3, 4];
        static ISO_INSTR: [u8; 2] = [5, 6];
        let t = table(&[
            (ISOLATE_SNAPSHOT_DATA_SYMBOL, ISO_DATA.as_ptr()),
            (ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL, ISO_INSTR.as_ptr()),
        ]);
        let b = buffers_from_symbols(|name| t.get(name).copied()).unwrap();
        assert!(b.vm_data.is_null());
        assert!(b.vm_instructions.is_null());
        assert_eq!(b.isolate_data, ISO_DATA.as_ptr());
        assert_eq!(b.isolate_instructions, ISO_INSTR.as_ptr());
    }

    #[test]
    fn missing_isolate_symbol_is_fatal() {
        static ISO_DATA: [u8; 1] = [9];
        static VM_DATA: [u8; 1] = [7];
        // isolate-instructions missing
        let t = table(&[
            (VM_SNAPSHOT_DATA_SYMBOL, VM_DATA.as_ptr()),
            (ISOLATE_SNAPSHOT_DATA_SYMBOL, ISO_DATA.as_ptr()),
        ]);
        let err = buffers_from_symbols(|name| t.get(name).copied()).unwrap_err();
        assert!(err.to_string().contains(ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL));

        // isolate-data missing
        let t = table(&[(ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL, ISO_DATA.as_ptr())]);
        let err = buffers_from_symbols(|name| t.get(name).copied()).unwrap_err();
        assert!(err.to_string().contains(ISOLATE_SNAPSHOT_DATA_SYMBOL));
    }

    #[test]
    fn all_four_resolved() {
        static B: [u8; 8] = [0; 8];
        let t = table(&[
            (VM_SNAPSHOT_DATA_SYMBOL, B.as_ptr()),
            (VM_SNAPSHOT_INSTRUCTIONS_SYMBOL, unsafe { B.as_ptr().add(1) }),
            (ISOLATE_SNAPSHOT_DATA_SYMBOL, unsafe { B.as_ptr().add(2) }),
            (ISOLATE_SNAPSHOT_INSTRUCTIONS_SYMBOL, unsafe { B.as_ptr().add(3) }),
        ]);
        let b = buffers_from_symbols(|name| t.get(name).copied()).unwrap();
        assert_eq!(b.vm_data, B.as_ptr());
        assert!(!b.vm_instructions.is_null());
        assert!(!b.isolate_data.is_null());
        assert!(!b.isolate_instructions.is_null());
    }

    #[test]
    fn open_of_non_library_is_soft_miss() {
        let p = std::env::temp_dir().join(format!(
            "appsnap-dylib-{}-{}.txt",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&p, b"definitely not a shared library").unwrap();
        assert!(try_read_snapshot_dylib(&p).unwrap().is_none());
    }
}
