#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
// Tests set environment variables
#![allow(unsafe_code)]

//! Configuration for warp-transit
//!
//! Settings come from built-in defaults, `WARP_TRANSIT_*` environment
//! variables and TOML files. [`Validator`] checks a loaded configuration
//! before anything is built from it.

pub mod config;
pub mod validate;

pub use config::*;
pub use validate::*;

use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed into the configuration schema
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Loaded configuration failed validation
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// A named setting has an unrecognized value
    #[error("unrecognized {field} {value:?}, expected one of: {expected}")]
    InvalidValue {
        /// Setting name
        field: String,
        /// Value given
        value: String,
        /// Accepted values
        expected: String,
    },

    /// An override variable could not be parsed
    #[error("environment variable {var} has invalid value {value:?}")]
    EnvVar {
        /// Variable name
        var: String,
        /// Value given
        value: String,
    },
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
