//! Bundle scanning and name lookup.
//!
//! This is the single entry-point the driver uses to turn a bundle path into
//! the descriptor of the plugin variant it wants to stress.

use std::path::Path;

use super::error::{NotFoundError, ScanError};
use super::runtime::FormatRuntime;
use super::types::*;
use crate::stress::LineSink;

pub struct PluginCatalog<'rt> {
    runtime: &'rt FormatRuntime,
    /// Forces a format instead of guessing from the bundle extension.
    format_override: Option<PluginFormat>,
}

impl<'rt> PluginCatalog<'rt> {
    pub fn new(runtime: &'rt FormatRuntime) -> Self {
        Self {
            runtime,
            format_override: None,
        }
    }

    pub fn with_format(mut self, format: Option<PluginFormat>) -> Self {
        self.format_override = format;
        self
    }

    /// List every plugin variant inside `bundle`, in factory order.
    ///
    /// An empty list means the bundle is valid but holds no variants.
    pub fn scan(&self, bundle: &Path) -> Result<Vec<PluginDescriptor>, ScanError> {
        if !bundle.exists() {
            return Err(ScanError::Missing(bundle.to_path_buf()));
        }

        let backend = match self.format_override {
            Some(format) => self.runtime.backend(format),
            None => self.runtime.backend_for_bundle(bundle),
        }
        .ok_or_else(|| ScanError::UnsupportedFormat(bundle.to_path_buf()))?;

        log::info!("{}: scanning {}", backend.format(), bundle.display());
        let descriptors = backend.scan(bundle)?;
        log::info!(
            "{}: found {} plugin(s) in {}",
            backend.format(),
            descriptors.len(),
            bundle.display()
        );
        Ok(descriptors)
    }
}

/// First descriptor whose display name equals `name` exactly.
pub fn find_by_name<'a>(
    descriptors: &'a [PluginDescriptor],
    name: &str,
) -> Result<&'a PluginDescriptor, NotFoundError> {
    descriptors
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| NotFoundError {
            name: name.to_string(),
            available: descriptors.len(),
        })
}

/// Emit one line per scanned type.
pub fn report_types(descriptors: &[PluginDescriptor], sink: &mut dyn LineSink) {
    sink.line("***** ENUMERATING TYPES");
    for d in descriptors {
        sink.line(&format!("\tTYPE NAME: {}", d.name));
    }
}
