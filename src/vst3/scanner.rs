//! VST3 plugin scanner.
//!
//! Enumerates the classes of a loaded module via `IPluginFactory` and turns
//! every audio processor class into a descriptor.

use vst3::Steinberg::*;

use super::module::Vst3Module;
use crate::plugin::ffi::{non_empty, read_cstr};
use crate::plugin::types::*;

const AUDIO_MODULE_CLASS: &str = "Audio Module Class";

/// List the audio processor classes exported by `module`, in factory order.
pub fn scan_module(module: &Vst3Module) -> Vec<PluginDescriptor> {
    let mut plugins = Vec::new();
    let Some(factory) = module.factory() else {
        return plugins;
    };

    // Safety: the factory pointer is valid while the module is loaded.
    unsafe {
        // Factory-level vendor is the fallback when a class has none
        let mut factory_info: PFactoryInfo = std::mem::zeroed();
        let factory_vendor = if factory.getFactoryInfo(&mut factory_info) == kResultOk {
            non_empty(read_cstr(&factory_info.vendor))
        } else {
            None
        };

        // Try to get IPluginFactory2 for richer info
        let factory2: Option<vst3::ComPtr<IPluginFactory2>> = factory.cast();

        let count = factory.countClasses();
        for i in 0..count {
            let mut info: PClassInfo = std::mem::zeroed();
            if factory.getClassInfo(i, &mut info) != kResultOk {
                log::debug!("VST3: getClassInfo({}) failed", i);
                continue;
            }

            // Only interested in Audio Module Class (processor components)
            if read_cstr(&info.category) != AUDIO_MODULE_CLASS {
                continue;
            }

            let name = read_cstr(&info.name);
            let uid = tuid_to_hex(&info.cid);

            let mut vendor = None;
            let mut version = None;
            let mut category = None;

            if let Some(ref f2) = factory2 {
                let mut info2: PClassInfo2 = std::mem::zeroed();
                if f2.getClassInfo2(i, &mut info2) == kResultOk {
                    vendor = non_empty(read_cstr(&info2.vendor));
                    version = non_empty(read_cstr(&info2.version));
                    category = non_empty(read_cstr(&info2.subCategories));
                }
            }

            log::debug!("VST3: class {} \"{}\" ({})", i, name, uid);

            plugins.push(PluginDescriptor {
                name,
                format: PluginFormat::Vst3,
                bundle_path: module.bundle_path.clone(),
                uid,
                vendor: vendor.or_else(|| factory_vendor.clone()),
                version,
                category,
            });
        }
    }

    plugins
}

/// Convert a TUID ([c_char; 16]) to a hex string for use as the plugin id.
pub fn tuid_to_hex(tuid: &[std::ffi::c_char; 16]) -> String {
    tuid.iter().map(|&b| format!("{:02X}", b as u8)).collect()
}

/// Parse a TUID from a hex string.
pub fn hex_to_tuid(hex: &str) -> Option<[std::ffi::c_char; 16]> {
    if hex.len() != 32 || !hex.is_ascii() {
        return None;
    }
    let mut tuid = [0 as std::ffi::c_char; 16];
    for (i, slot) in tuid.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        *slot = byte as std::ffi::c_char;
    }
    Some(tuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuid_hex_conversion() {
        let mut tuid = [0 as std::ffi::c_char; 16];
        tuid[0] = 0xAB_u8 as std::ffi::c_char;
        tuid[15] = 0x01;
        let hex = tuid_to_hex(&tuid);
        assert_eq!(hex, "AB000000000000000000000000000001");
        assert_eq!(hex_to_tuid(&hex), Some(tuid));

        assert_eq!(hex_to_tuid("AB"), None);
        assert_eq!(hex_to_tuid("ZZ000000000000000000000000000001"), None);
    }
}
