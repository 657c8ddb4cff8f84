//! CLAP plugin hosting backend.
//!
//! Provides scanning and instantiation of CLAP audio plugins (.clap files).

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
use module::ClapModule;

pub struct ClapBackend {
    modules: Mutex<HashMap<PathBuf, Arc<ClapModule>>>,
}

impl ClapBackend {
    /// The calling thread becomes the CLAP "main thread".
    pub fn new() -> Self {
        host::set_main_thread_id();
        Self {
            modules: Mutex::new(HashMap::new()),
        }
    }

    fn module(&self, bundle: &Path) -> Result<Arc<ClapModule>, ScanError> {
        let mut modules = self.modules.lock();
        if let Some(m) = modules.get(bundle) {
            return Ok(m.clone());
        }
        let module = Arc::new(ClapModule::load(bundle)?);
        modules.insert(bundle.to_path_buf(), module.clone());
        Ok(module)
    }
}

impl PluginFormatBackend for ClapBackend {
    fn format(&self) -> PluginFormat {
        PluginFormat::Clap
    }

    fn scan(&self, bundle: &Path) -> Result<Vec<PluginDescriptor>, ScanError> {
        let module = self.module(bundle)?;
        if module.factory().is_none() {
            return Err(ScanError::NullFactory {
                path: module.binary_path.clone(),
            });
        }
        Ok(scanner::scan_module(&module))
    }

    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Box<dyn PluginInstance>, InstantiationError> {
        let module = self.module(&descriptor.bundle_path)?;
        let instance = host::ClapPluginInstance::new(module, descriptor, config)?;
        Ok(Box::new(instance))
    }

    fn teardown(&self) {
        let modules: Vec<_> = self.modules.lock().drain().collect();
        for (path, module) in modules {
            if Arc::strong_count(&module) > 1 {
                log::warn!("CLAP: {} still has live instances at teardown", path.display());
            }
        }
    }
}
