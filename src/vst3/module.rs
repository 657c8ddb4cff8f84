//! Loading the shared library inside a `.vst3` bundle.

use std::ffi::{CStr, CString, c_void};
use std::path::{Path, PathBuf};

use vst3::Steinberg::*;

use crate::plugin::ScanError;

/// A dlopen'd VST3 module and its plugin factory.
///
/// `ModuleEntry` has been called on load; `ModuleExit` is called on drop,
/// after the factory has been released.  Every instance created from the
/// module holds an `Arc` to it, so it outlives them.
pub struct Vst3Module {
    handle: *mut c_void,
    factory: Option<vst3::ComPtr<IPluginFactory>>,
    pub bundle_path: PathBuf,
    pub binary_path: PathBuf,
}

impl Vst3Module {
    /// Load the binary inside `bundle_path` and fetch its factory.
    pub fn load(bundle_path: &Path) -> Result<Self, ScanError> {
        let binary_path = find_bundle_binary(bundle_path)
            .ok_or_else(|| ScanError::NoBinary(bundle_path.to_path_buf()))?;
        let so_str = binary_path
            .to_str()
            .ok_or_else(|| ScanError::InvalidPath(binary_path.clone()))?;
        let c_path =
            CString::new(so_str).map_err(|_| ScanError::InvalidPath(binary_path.clone()))?;

        log::info!("VST3: loading bundle {}", bundle_path.display());

        // Safety: All VST3 interactions use raw C FFI via dlopen.
        unsafe {
            let handle = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
            if handle.is_null() {
                return Err(ScanError::Load {
                    path: binary_path,
                    reason: last_dl_error(),
                });
            }

            // Call ModuleEntry (Linux VST3 requirement)
            let module_entry_sym = libc::dlsym(handle, c"ModuleEntry".as_ptr());
            if !module_entry_sym.is_null() {
                let module_entry: unsafe extern "system" fn(*mut c_void) -> bool =
                    std::mem::transmute(module_entry_sym);
                if !module_entry(handle) {
                    libc::dlclose(handle);
                    return Err(ScanError::EntryFailed { path: binary_path });
                }
            }

            // From here on the module owns the handle, so failures below
            // still run ModuleExit.
            let mut module = Self {
                handle,
                factory: None,
                bundle_path: bundle_path.to_path_buf(),
                binary_path,
            };

            let get_factory_sym = libc::dlsym(handle, c"GetPluginFactory".as_ptr());
            if get_factory_sym.is_null() {
                return Err(ScanError::MissingEntryPoint {
                    path: module.binary_path.clone(),
                    symbol: "GetPluginFactory",
                });
            }

            let get_factory: unsafe extern "system" fn() -> *mut IPluginFactory =
                std::mem::transmute(get_factory_sym);
            let factory_raw = get_factory();

            module.factory = vst3::ComPtr::<IPluginFactory>::from_raw(factory_raw);
            if module.factory.is_none() {
                return Err(ScanError::NullFactory {
                    path: module.binary_path.clone(),
                });
            }

            Ok(module)
        }
    }

    pub fn factory(&self) -> Option<&vst3::ComPtr<IPluginFactory>> {
        self.factory.as_ref()
    }
}

impl Drop for Vst3Module {
    fn drop(&mut self) {
        // Release the factory before module exit
        drop(self.factory.take());
        log::debug!("VST3: unloading {}", self.binary_path.display());
        unsafe {
            call_module_exit(self.handle);
        }
        // Do NOT dlclose: some plugins leave threads or atexit handlers
        // pointing into the image.
    }
}

/// Call ModuleExit if available.
unsafe fn call_module_exit(lib: *mut c_void) {
    unsafe {
        let sym = libc::dlsym(lib, c"ModuleExit".as_ptr());
        if !sym.is_null() {
            let module_exit: unsafe extern "system" fn() -> bool = std::mem::transmute(sym);
            module_exit();
        }
    }
}

fn last_dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown dlopen error".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

/// Resolve the shared library path inside a .vst3 bundle.
///
/// VST3 bundle structure: `<name>.vst3/Contents/<arch>-linux/<name>.so`
/// (Linux) or `<name>.vst3/Contents/MacOS/<name>` (macOS).  A plain file is
/// taken to be the binary itself.
pub fn find_bundle_binary(bundle_path: &Path) -> Option<PathBuf> {
    if bundle_path.is_file() {
        return Some(bundle_path.to_path_buf());
    }

    // The running architecture first, then the other standard names
    let native = format!("{}-linux", std::env::consts::ARCH);
    let arch_dirs = [
        native.as_str(),
        "x86_64-linux",
        "i386-linux",
        "aarch64-linux",
        "armv7l-linux",
    ];

    for arch in &arch_dirs {
        let contents_dir = bundle_path.join("Contents").join(arch);
        if let Some(p) = first_with_extension(&contents_dir, "so") {
            return Some(p);
        }
    }

    let macos_dir = bundle_path.join("Contents").join("MacOS");
    if let Some(stem) = bundle_path.file_stem() {
        let candidate = macos_dir.join(stem);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    // Fallback: some bundles put the .so directly in the bundle root
    first_with_extension(bundle_path, "so")
}

fn first_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
        .collect();
    // read_dir order is unspecified; keep resolution stable across scans
    found.sort();
    found.into_iter().next()
}
