//! Error types for scanning, name lookup and instantiation.

use std::path::PathBuf;

use thiserror::Error;

/// The bundle could not be inspected.  An empty bundle is not an error.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("bundle does not exist: {0}")]
    Missing(PathBuf),
    #[error("no registered plugin format recognises {0}")]
    UnsupportedFormat(PathBuf),
    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),
    #[error("no loadable binary inside {0}")]
    NoBinary(PathBuf),
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("{path} does not export {symbol}")]
    MissingEntryPoint { path: PathBuf, symbol: &'static str },
    #[error("{path}: module initialisation failed")]
    EntryFailed { path: PathBuf },
    #[error("{path}: plugin factory is unavailable")]
    NullFactory { path: PathBuf },
}

#[derive(Debug, Error)]
#[error("no plugin named {name:?} among {available} scanned variant(s)")]
pub struct NotFoundError {
    pub name: String,
    pub available: usize,
}

/// A plugin could not be turned into a usable instance.  Carries the
/// diagnostic text reported by the backend or the plugin.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InstantiationError {
    pub message: String,
}

impl InstantiationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ScanError> for InstantiationError {
    fn from(err: ScanError) -> Self {
        Self::new(err.to_string())
    }
}

#[derive(Debug, Error)]
#[error("unknown plugin format {0:?} (expected \"vst3\" or \"clap\")")]
pub struct UnknownFormatError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = NotFoundError {
            name: "Q10 Stereo".into(),
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "no plugin named \"Q10 Stereo\" among 3 scanned variant(s)"
        );

        let err: InstantiationError = ScanError::NoBinary(PathBuf::from("/tmp/x.vst3")).into();
        assert_eq!(err.message, "no loadable binary inside /tmp/x.vst3");
    }
}
