//! Process-scoped plugin-format registration table.
//!
//! The runtime is created once by the driver before any scan and shut down
//! once after the stress loop.  Backends keep their loaded native modules
//! alive inside it, so a bundle's binary is loaded a single time per run
//! regardless of how many instances are created from it.

use std::path::Path;

use super::backend::PluginFormatBackend;
use super::types::PluginFormat;

pub struct FormatRuntime {
    backends: Vec<Box<dyn PluginFormatBackend>>,
    shut_down: bool,
}

impl FormatRuntime {
    /// Register every format this build supports (VST3, then CLAP).
    pub fn initialise() -> Self {
        log::info!("Initialising plugin format runtime");
        Self::with_backends(vec![
            Box::new(crate::vst3::Vst3Backend::new()),
            Box::new(crate::clap::ClapBackend::new()),
        ])
    }

    pub fn with_backends(backends: Vec<Box<dyn PluginFormatBackend>>) -> Self {
        for b in &backends {
            log::debug!("Registered plugin format {}", b.format());
        }
        Self {
            backends,
            shut_down: false,
        }
    }

    pub fn backend(&self, format: PluginFormat) -> Option<&dyn PluginFormatBackend> {
        self.backends
            .iter()
            .find(|b| b.format() == format)
            .map(|b| b.as_ref())
    }

    /// First registered backend that recognises the bundle's extension.
    pub fn backend_for_bundle(&self, bundle: &Path) -> Option<&dyn PluginFormatBackend> {
        self.backends
            .iter()
            .find(|b| b.recognises(bundle))
            .map(|b| b.as_ref())
    }

    /// Tear down every backend.  Must only be called once no instance is
    /// alive any more.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for b in &self.backends {
            log::debug!("Tearing down plugin format {}", b.format());
            b.teardown();
        }
        log::info!("Plugin format runtime shut down");
    }
}

impl Drop for FormatRuntime {
    fn drop(&mut self) {
        self.teardown();
    }
}
