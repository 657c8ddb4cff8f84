//! CLAP plugin scanner.
//!
//! Enumerates the plugins of a loaded module via the CLAP plugin factory.

use std::ffi::{CStr, c_char};

use super::module::ClapModule;
use crate::plugin::ffi::non_empty;
use crate::plugin::types::*;

/// List every plugin descriptor of `module`, in factory order.
pub fn scan_module(module: &ClapModule) -> Vec<PluginDescriptor> {
    let mut plugins = Vec::new();
    let Some(factory) = module.factory() else {
        log::debug!("CLAP: no plugin factory in {}", module.binary_path.display());
        return plugins;
    };

    unsafe {
        let count = match factory.get_plugin_count {
            Some(f) => f(factory),
            None => 0,
        };

        for i in 0..count {
            let desc_ptr = match factory.get_plugin_descriptor {
                Some(f) => f(factory, i),
                None => continue,
            };
            if desc_ptr.is_null() {
                continue;
            }
            let desc = &*desc_ptr;

            let Some(id) = read_cstr_ptr(desc.id) else {
                continue;
            };
            let name = read_cstr_ptr(desc.name).unwrap_or_else(|| id.clone());
            let features = parse_features(desc.features);

            log::debug!("CLAP: plugin {} \"{}\" ({})", i, name, id);

            plugins.push(PluginDescriptor {
                name,
                format: PluginFormat::Clap,
                bundle_path: module.bundle_path.clone(),
                uid: id,
                vendor: read_cstr_ptr(desc.vendor),
                version: read_cstr_ptr(desc.version),
                category: features.first().cloned(),
            });
        }
    }

    plugins
}

/// Read a C string pointer; null and empty strings give `None`.
pub fn read_cstr_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    non_empty(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

fn parse_features(features_ptr: *const *const c_char) -> Vec<String> {
    let mut features = Vec::new();
    if features_ptr.is_null() {
        return features;
    }
    unsafe {
        let mut i = 0;
        loop {
            let p = *features_ptr.add(i);
            if p.is_null() {
                break;
            }
            if let Some(s) = read_cstr_ptr(p) {
                features.push(s);
            }
            i += 1;
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_features_until_null() {
        let features = [
            c"audio-effect".as_ptr(),
            c"equalizer".as_ptr(),
            std::ptr::null(),
        ];
        assert_eq!(parse_features(features.as_ptr()), ["audio-effect", "equalizer"]);
        assert!(parse_features(std::ptr::null()).is_empty());
    }

    #[test]
    fn test_read_cstr_ptr() {
        assert_eq!(read_cstr_ptr(c"Q10".as_ptr()), Some("Q10".to_string()));
        assert_eq!(read_cstr_ptr(c"".as_ptr()), None);
        assert_eq!(read_cstr_ptr(std::ptr::null()), None);
    }
}
