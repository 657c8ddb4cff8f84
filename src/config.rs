//! Command-line flags and the optional JSON settings file.
//!
//! Every setting resolves as: CLI flag, then settings file, then the
//! built-in default.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::plugin::{HostAudioConfig, PluginFormat};

pub const DEFAULT_PLUGIN_NAME: &str = "Q10 Stereo";
pub const DEFAULT_ITERATIONS: u32 = 1000;
pub const DEFAULT_VERBOSE: i64 = 1;

const DEFAULT_BUNDLE_NAME: &str = "WaveShell1-VST3 13.0.vst3";

#[derive(Parser, Debug, Default)]
#[command(
    name = "plugstress",
    version,
    about = "Repeatedly instantiate a plugin and write back every parameter"
)]
pub struct Cli {
    /// Plugin bundle to scan (.vst3 or .clap)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Display name of the plugin variant to stress
    #[arg(long)]
    pub name: Option<String>,

    /// Number of create / set / release cycles
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Log every parameter round-trip (non-zero = on)
    #[arg(long, allow_negative_numbers = true)]
    pub verbose: Option<i64>,

    #[arg(long)]
    pub sample_rate: Option<f64>,

    #[arg(long)]
    pub block_size: Option<u32>,

    /// Force a plugin format instead of detecting it from the extension
    #[arg(long, value_parser = parse_format)]
    pub format: Option<PluginFormat>,

    /// JSON settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the scanned plugins as JSON and exit
    #[arg(long)]
    pub list: bool,
}

fn parse_format(s: &str) -> Result<PluginFormat, String> {
    s.parse().map_err(|e: crate::plugin::UnknownFormatError| e.to_string())
}

/// Contents of `settings.json`.  Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SettingsFile {
    pub path: Option<PathBuf>,
    pub name: Option<String>,
    pub iterations: Option<u32>,
    pub verbose: Option<i64>,
    pub sample_rate: Option<f64>,
    pub block_size: Option<u32>,
    pub format: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown plugin format {0:?} (expected vst3 or clap)")]
    InvalidFormat(String),
    #[error("invalid audio configuration: {0}")]
    InvalidAudioConfig(String),
}

/// Fully resolved run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bundle_path: PathBuf,
    pub plugin_name: String,
    pub iterations: u32,
    pub verbose: bool,
    pub audio: HostAudioConfig,
    pub format: Option<PluginFormat>,
    pub list_only: bool,
}

impl Settings {
    /// Load the settings file (if any) and merge it with `cli`.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => load_settings_file(path)?,
            None => load_default_settings_file(),
        };
        Self::merge(cli, file)
    }

    pub fn merge(cli: &Cli, file: SettingsFile) -> Result<Self, ConfigError> {
        let format = match cli.format {
            Some(f) => Some(f),
            None => file
                .format
                .as_deref()
                .map(|s| {
                    s.parse::<PluginFormat>()
                        .map_err(|_| ConfigError::InvalidFormat(s.to_string()))
                })
                .transpose()?,
        };

        let audio = HostAudioConfig::new(
            cli.sample_rate
                .or(file.sample_rate)
                .unwrap_or(HostAudioConfig::DEFAULT_SAMPLE_RATE),
            cli.block_size
                .or(file.block_size)
                .unwrap_or(HostAudioConfig::DEFAULT_BLOCK_SIZE),
        );
        audio
            .validate()
            .map_err(|e| ConfigError::InvalidAudioConfig(e.to_string()))?;

        Ok(Self {
            bundle_path: cli
                .path
                .clone()
                .or(file.path)
                .unwrap_or_else(default_bundle_path),
            plugin_name: cli
                .name
                .clone()
                .or(file.name)
                .unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
            iterations: cli
                .iterations
                .or(file.iterations)
                .unwrap_or(DEFAULT_ITERATIONS),
            verbose: cli.verbose.or(file.verbose).unwrap_or(DEFAULT_VERBOSE) != 0,
            audio,
            format,
            list_only: cli.list,
        })
    }
}

pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `<config_dir>/plugstress/settings.json`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("plugstress").join("settings.json"))
}

fn load_default_settings_file() -> SettingsFile {
    let Some(path) = default_settings_path() else {
        return SettingsFile::default();
    };
    if !path.exists() {
        return SettingsFile::default();
    }
    match load_settings_file(&path) {
        Ok(file) => {
            log::debug!("Loaded settings from {}", path.display());
            file
        }
        Err(e) => {
            log::warn!("Ignoring {}", e);
            SettingsFile::default()
        }
    }
}

pub fn default_bundle_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Library/Audio/Plug-Ins/VST3").join(DEFAULT_BUNDLE_NAME)
    } else {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".vst3")
            .join(DEFAULT_BUNDLE_NAME)
    }
}
