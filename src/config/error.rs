use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading a [`BusConfig`](super::BusConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error on '{path}': {details}")]
    Io {
        /// File being read
        path: PathBuf,
        /// I/O error details
        details: String,
    },

    /// TOML parsing error with location context
    #[error("failed to parse TOML at '{location}': {details}")]
    TomlParse {
        /// File path or "string"
        location: String,
        /// Parse error details
        details: String,
    },

    /// A field holds a value outside its allowed range.
    #[error("invalid config field '{field}': {reason}")]
    InvalidField {
        /// The field that is invalid
        field: String,
        /// Reason why the field is invalid
        reason: String,
    },

    /// No configuration directory could be determined.
    #[error("cannot locate configuration directory: {0}")]
    NoConfigDir(#[from] io::Error),
}

impl ConfigError {
    pub(super) fn toml_parse(error: impl std::fmt::Display, location: Option<&std::path::Path>) -> Self {
        let location = match location {
            Some(path) => path.to_string_lossy().to_string(),
            None => "string".to_string(),
        };

        ConfigError::TomlParse {
            location,
            details: error.to_string(),
        }
    }
}
