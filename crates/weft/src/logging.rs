#![forbid(unsafe_code)]

//! Log output settings and, with the `logging` feature, subscriber setup.
//!
//! The library crates only emit `tracing` events; nothing is printed until
//! the application installs a subscriber. [`init`] is a convenience for
//! applications that have no subscriber of their own.

use core::fmt;

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum LogFormat {
    /// One line per event.
    #[default]
    Compact,
    /// Multi-line, human oriented.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

/// Logging section of [`WeftConfig`](crate::WeftConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default, deny_unknown_fields))]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(feature = "logging")]
pub use setup::{LoggingError, init};

#[cfg(feature = "logging")]
mod setup {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, fmt};

    use super::{LogFormat, LoggingConfig};

    #[derive(Debug, thiserror::Error)]
    pub enum LoggingError {
        #[error("invalid log filter: {0}")]
        Filter(#[from] tracing_subscriber::filter::ParseError),
        #[error("a global subscriber is already installed: {0}")]
        Init(#[from] tracing_subscriber::util::TryInitError),
    }

    /// Install a global subscriber. `RUST_LOG` takes precedence over
    /// [`LoggingConfig::filter`].
    pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.filter)?,
        };
        let layer = match config.format {
            LogFormat::Compact => fmt::layer().compact().boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
            LogFormat::Json => fmt::layer().json().boxed(),
        };
        tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()?;
        tracing::debug!(format = %config.format, "logging initialized");
        Ok(())
    }
}
