//! The seam between the format-agnostic core and each native format.

use std::path::Path;

use super::error::{InstantiationError, ScanError};
use super::types::*;

/// One native plugin format (VST3, CLAP).  A backend knows how to list the
/// variants inside a bundle and how to bring one of them to life.
pub trait PluginFormatBackend {
    fn format(&self) -> PluginFormat;

    /// Whether `bundle` looks like a bundle of this format.
    fn recognises(&self, bundle: &Path) -> bool {
        bundle
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(self.format().bundle_extension()))
    }

    /// List every plugin variant in `bundle`, in the order the format's
    /// factory reports them.
    fn scan(&self, bundle: &Path) -> Result<Vec<PluginDescriptor>, ScanError>;

    /// Create a new, independent instance of `descriptor`.  Anything built
    /// before a failure must be torn down before returning the error.
    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Box<dyn PluginInstance>, InstantiationError>;

    /// Release cached native modules.  Called once when the runtime shuts down.
    fn teardown(&self) {}
}

/// A live plugin.  Dropping the instance releases every native resource it
/// owns, including its parameters.
pub trait PluginInstance {
    /// Display name of the running plugin.
    fn name(&self) -> &str;

    /// The flattened parameter set with current values, in the order the
    /// plugin exposes them.
    fn parameters(&self) -> Vec<ParameterNode>;

    /// Current normalized value of parameter `id`.
    fn parameter_value(&self, id: u32) -> Option<f64>;

    /// Write a normalized value to parameter `id`.
    fn set_parameter_value(&mut self, id: u32, value: f64);
}
