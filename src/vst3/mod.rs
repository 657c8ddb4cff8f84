//! VST3 plugin hosting backend.
//!
//! Provides scanning and instantiation of VST3 audio plugins (.vst3
//! bundles).  Loaded modules are cached for the lifetime of the backend so
//! repeated instantiation never reloads the bundle's binary.

pub mod com_host;
pub mod host;
pub mod module;
pub mod scanner;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::plugin::{
    HostAudioConfig, InstantiationError, PluginDescriptor, PluginFormat, PluginFormatBackend,
    PluginInstance, ScanError,
};
use module::Vst3Module;

pub struct Vst3Backend {
    modules: Mutex<HashMap<PathBuf, Arc<Vst3Module>>>,
}

impl Vst3Backend {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Load `bundle` once and hand out the cached module afterwards.
    fn module(&self, bundle: &Path) -> Result<Arc<Vst3Module>, ScanError> {
        let mut modules = self.modules.lock();
        if let Some(m) = modules.get(bundle) {
            return Ok(m.clone());
        }
        let module = Arc::new(Vst3Module::load(bundle)?);
        modules.insert(bundle.to_path_buf(), module.clone());
        Ok(module)
    }
}

impl PluginFormatBackend for Vst3Backend {
    fn format(&self) -> PluginFormat {
        PluginFormat::Vst3
    }

    fn scan(&self, bundle: &Path) -> Result<Vec<PluginDescriptor>, ScanError> {
        let module = self.module(bundle)?;
        Ok(scanner::scan_module(&module))
    }

    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Box<dyn PluginInstance>, InstantiationError> {
        let module = self.module(&descriptor.bundle_path)?;
        let instance = host::Vst3PluginInstance::new(module, descriptor, config)?;
        Ok(Box::new(instance))
    }

    fn teardown(&self) {
        let modules: Vec<_> = self.modules.lock().drain().collect();
        for (path, module) in modules {
            if Arc::strong_count(&module) > 1 {
                log::warn!("VST3: {} still has live instances at teardown", path.display());
            }
        }
    }
}
