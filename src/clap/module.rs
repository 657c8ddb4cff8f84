//! Loading a `.clap` binary and its plugin factory.

use std::ffi::{CStr, CString, c_void};
use std::path::{Path, PathBuf};

use clap_sys::entry::clap_plugin_entry;
use clap_sys::factory::plugin_factory::{CLAP_PLUGIN_FACTORY_ID, clap_plugin_factory};

use crate::plugin::ScanError;

/// A loaded CLAP plugin library (keeps the dlopen handle alive).
///
/// `entry.init` has succeeded; `entry.deinit` runs on drop.
pub struct ClapModule {
    /// dlopen handle; never closed while any plugin from this lib exists.
    _handle: *mut c_void,
    /// The entry point (lives inside the .so).
    entry: *const clap_plugin_entry,
    pub bundle_path: PathBuf,
    pub binary_path: PathBuf,
}

impl ClapModule {
    pub fn load(bundle_path: &Path) -> Result<Self, ScanError> {
        let binary_path = find_clap_binary(bundle_path)
            .ok_or_else(|| ScanError::NoBinary(bundle_path.to_path_buf()))?;
        let c_binary = to_cstring(&binary_path)?;
        let c_bundle = to_cstring(bundle_path)?;

        log::debug!("CLAP: loading {}", binary_path.display());

        // Safety: All CLAP interactions use raw C FFI via dlopen.
        unsafe {
            let handle = libc::dlopen(c_binary.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
            if handle.is_null() {
                let err = libc::dlerror();
                let reason = if err.is_null() {
                    "unknown dlopen error".to_string()
                } else {
                    CStr::from_ptr(err).to_string_lossy().into_owned()
                };
                return Err(ScanError::Load {
                    path: binary_path,
                    reason,
                });
            }

            let entry_ptr = libc::dlsym(handle, c"clap_entry".as_ptr());
            if entry_ptr.is_null() {
                libc::dlclose(handle);
                return Err(ScanError::MissingEntryPoint {
                    path: binary_path,
                    symbol: "clap_entry",
                });
            }

            let entry = entry_ptr as *const clap_plugin_entry;
            let entry_ref = &*entry;

            if entry_ref.clap_version.major < 1 {
                log::debug!("CLAP: unsupported version in {}", binary_path.display());
                libc::dlclose(handle);
                return Err(ScanError::EntryFailed { path: binary_path });
            }

            // The plugin gets the bundle path, not the binary inside it
            let init_ok = match entry_ref.init {
                Some(init_fn) => init_fn(c_bundle.as_ptr()),
                None => false,
            };
            if !init_ok {
                log::warn!("CLAP: init() returned false for {}", binary_path.display());
                if let Some(deinit) = entry_ref.deinit {
                    deinit();
                }
                libc::dlclose(handle);
                return Err(ScanError::EntryFailed { path: binary_path });
            }

            Ok(Self {
                _handle: handle,
                entry,
                bundle_path: bundle_path.to_path_buf(),
                binary_path,
            })
        }
    }

    /// The module's plugin factory, if it exports one.
    pub fn factory(&self) -> Option<&clap_plugin_factory> {
        unsafe {
            let entry = &*self.entry;
            let factory_ptr = entry.get_factory?(CLAP_PLUGIN_FACTORY_ID.as_ptr());
            if factory_ptr.is_null() {
                return None;
            }
            Some(&*(factory_ptr as *const clap_plugin_factory))
        }
    }
}

impl Drop for ClapModule {
    fn drop(&mut self) {
        log::debug!("CLAP: unloading {}", self.binary_path.display());
        let entry = unsafe { &*self.entry };
        if let Some(deinit) = entry.deinit {
            unsafe {
                deinit();
            }
        }
        // We intentionally do NOT dlclose: descriptor strings live inside the .so
    }
}

fn to_cstring(path: &Path) -> Result<CString, ScanError> {
    path.to_str()
        .and_then(|s| CString::new(s).ok())
        .ok_or_else(|| ScanError::InvalidPath(path.to_path_buf()))
}

/// Resolve the binary of a CLAP bundle.
///
/// On Linux a `.clap` is the shared object itself.  On macOS it is a bundle
/// directory with the binary in `Contents/MacOS/`.
pub fn find_clap_binary(bundle_path: &Path) -> Option<PathBuf> {
    if bundle_path.is_file() {
        return Some(bundle_path.to_path_buf());
    }

    let macos_dir = bundle_path.join("Contents").join("MacOS");
    if let Some(stem) = bundle_path.file_stem() {
        let candidate = macos_dir.join(stem);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(&macos_dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_clap_binary() {
        let dir = tempfile::tempdir().unwrap();

        let flat = dir.path().join("Gain.clap");
        std::fs::write(&flat, b"").unwrap();
        assert_eq!(find_clap_binary(&flat), Some(flat.clone()));

        let bundle = dir.path().join("Synth.clap");
        let macos = bundle.join("Contents").join("MacOS");
        std::fs::create_dir_all(&macos).unwrap();
        std::fs::write(macos.join("SynthBinary"), b"").unwrap();
        assert_eq!(find_clap_binary(&bundle), Some(macos.join("SynthBinary")));

        let empty = dir.path().join("Empty.clap");
        std::fs::create_dir_all(&empty).unwrap();
        assert_eq!(find_clap_binary(&empty), None);
    }

    #[test]
    fn test_load_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("Fake.clap");
        std::fs::write(&fake, b"definitely not a shared object").unwrap();
        assert!(matches!(ClapModule::load(&fake), Err(ScanError::Load { .. })));
    }
}
