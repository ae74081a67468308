#![forbid(unsafe_code)]

//! Configuration as data.
//!
//! A [`WeftConfig`] bundles default reconciliation, normalization and logging
//! settings so applications can keep them in a TOML or JSON file:
//!
//! ```toml
//! [preserve]
//! destroy_obsolete = true
//! preserve_circular = true
//!
//! [normalize]
//! ignore_differences = false
//!
//! [logging]
//! filter = "weft_preserve=debug,info"
//! format = "json"
//! ```
//!
//! Missing sections and fields take their defaults; unknown top-level
//! sections are rejected.

use std::fs;
use std::path::{Path, PathBuf};

use weft_preserve::{NormalizeOptions, PreserveOptions};

use crate::logging::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to render TOML config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot tell the format of {path}: expected a .toml or .json extension")]
    UnknownFormat { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeftConfig {
    pub preserve: PreserveOptions,
    pub normalize: NormalizeOptions,
    pub logging: LoggingConfig,
}

impl WeftConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a file, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_str(&text)?,
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text)?,
            _ => {
                return Err(ConfigError::UnknownFormat {
                    path: path.to_path_buf(),
                });
            }
        };
        tracing::debug!(path = %path.display(), "loaded weft config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}
