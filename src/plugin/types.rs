//! Format-agnostic plugin types shared by the VST3 and CLAP backends.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{InstantiationError, UnknownFormatError};

// ---------------------------------------------------------------------------
// Plugin format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginFormat {
    Vst3,
    Clap,
}

impl PluginFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vst3 => "VST3",
            Self::Clap => "CLAP",
        }
    }

    /// File extension of a bundle in this format (without the dot).
    pub fn bundle_extension(&self) -> &'static str {
        match self {
            Self::Vst3 => "vst3",
            Self::Clap => "clap",
        }
    }
}

impl std::fmt::Display for PluginFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginFormat {
    type Err = UnknownFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vst3" => Ok(Self::Vst3),
            "clap" => Ok(Self::Clap),
            _ => Err(UnknownFormatError(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Plugin descriptor (catalog entry, scanned but not instantiated)
// ---------------------------------------------------------------------------

/// One plugin variant found inside a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Display name.  Not unique: a bundle may expose several variants with
    /// the same name, and the same plugin may ship in several formats.
    pub name: String,
    pub format: PluginFormat,
    /// The bundle this variant was scanned from.
    pub bundle_path: PathBuf,
    /// Format-specific identifier: the class-id hex string for VST3, the
    /// plugin-id string for CLAP.
    pub uid: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

// ---------------------------------------------------------------------------
// Host audio configuration
// ---------------------------------------------------------------------------

/// Audio environment presented to a plugin when it is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostAudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Maximum block size in frames.
    pub block_size: u32,
}

impl HostAudioConfig {
    pub const DEFAULT_SAMPLE_RATE: f64 = 48000.0;
    pub const DEFAULT_BLOCK_SIZE: u32 = 2048;

    pub fn new(sample_rate: f64, block_size: u32) -> Self {
        Self {
            sample_rate,
            block_size,
        }
    }

    pub fn validate(&self) -> Result<(), InstantiationError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(InstantiationError::new(format!(
                "invalid sample rate {}",
                self.sample_rate
            )));
        }
        if self.block_size == 0 {
            return Err(InstantiationError::new("block size must be non-zero"));
        }
        Ok(())
    }
}

impl Default for HostAudioConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SAMPLE_RATE, Self::DEFAULT_BLOCK_SIZE)
    }
}

// ---------------------------------------------------------------------------
// Parameter node (runtime state of one exposed control)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterNode {
    /// Stable identifier (VST3 ParamID / CLAP clap_id).
    pub id: u32,
    pub name: String,
    /// Slash-separated path of the unit (VST3) or module (CLAP) the
    /// parameter belongs to.  Empty for parameters at the root.
    pub group: String,
    /// Current value, normalized to [0, 1].
    pub value: f64,
}

impl ParameterNode {
    pub fn in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.value)
    }

    /// `group/name`, or just the name at the root.  Unique where bare names
    /// repeat across units.
    pub fn path(&self) -> String {
        if self.group.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.group, self.name)
        }
    }
}

/// Map a plain value in `[min, max]` to [0, 1].  Values outside the range
/// map outside [0, 1] so callers can see them.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span.abs() <= f64::EPSILON {
        return 0.0;
    }
    (value - min) / span
}

/// Map a normalized value back into `[min, max]`.  Inverse of `normalize`.
pub fn denormalize(normalized: f64, min: f64, max: f64) -> f64 {
    min + normalized * (max - min)
}
