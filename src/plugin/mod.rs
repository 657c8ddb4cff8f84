//! Format-agnostic plugin abstraction layer.
//!
//! This module defines the shared types and interfaces used by all plugin
//! format backends (CLAP, VST3).  Each backend lives in its own top-level
//! module (`src/clap/`, `src/vst3/`) and is registered with the
//! [`FormatRuntime`], which the [`PluginCatalog`] and [`PluginFactory`]
//! dispatch through.

pub mod backend;
pub mod catalog;
pub mod error;
pub mod factory;
pub mod ffi;
pub mod runtime;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use backend::{PluginFormatBackend, PluginInstance};
pub use catalog::{PluginCatalog, find_by_name};
pub use error::*;
pub use factory::PluginFactory;
pub use runtime::FormatRuntime;
pub use types::*;
