//! Checks run on a loaded [`TransitConfig`] before the engine is built

use crate::config::{KEY_TYPES, LogOutput, StorageBackend, TransitConfig};
use crate::{ConfigError, Result};
use std::fmt;

/// Concurrency above this is accepted but flagged in strict mode
const HIGH_CONCURRENCY: usize = 1024;

/// What a validation issue is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    /// A setting that must be present is empty
    Required,
    /// A numeric setting is outside its usable range
    OutOfRange,
    /// A value names something the engine does not support
    Unsupported,
    /// A path exists but is not the kind of entry expected
    WrongKind,
    /// A path's parent directory is missing
    MissingParent,
    /// A setting works but is probably not what production wants
    Risky,
}

/// A single problem found in a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted setting name, e.g. `engine.max_concurrency`
    pub field: &'static str,
    /// Classification
    pub code: IssueCode,
    /// Description of the problem
    pub message: String,
    /// How to fix it, when there is an obvious fix
    pub hint: Option<&'static str>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)?;
        match self.hint {
            Some(hint) => write!(f, " ({hint})"),
            None => Ok(()),
        }
    }
}

/// Errors and warnings collected by [`Validator::validate`]
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Issues that make the configuration unusable
    pub errors: Vec<ValidationIssue>,
    /// Issues worth logging that do not block startup
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when no errors were found
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Return the warnings, or a single [`ConfigError::Validation`] listing
    /// every error
    pub fn into_result(self) -> Result<Vec<ValidationIssue>> {
        if self.is_valid() {
            return Ok(self.warnings);
        }
        let message = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Validation(message))
    }

    fn error(&mut self, field: &'static str, code: IssueCode, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field,
            code,
            message: message.into(),
            hint: None,
        });
    }

    fn warn(
        &mut self,
        field: &'static str,
        code: IssueCode,
        message: impl Into<String>,
        hint: &'static str,
    ) {
        self.warnings.push(ValidationIssue {
            field,
            code,
            message: message.into(),
            hint: Some(hint),
        });
    }
}

/// Configuration validator
///
/// Strict mode adds warnings for settings that are valid but permissive.
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator {
    strict: bool,
}

impl Validator {
    /// Validator with strict mode off
    pub const fn new() -> Self {
        Self { strict: false }
    }

    /// Toggle strict mode
    pub const fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Check every section of `config`
    pub fn validate(&self, config: &TransitConfig) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_engine(config, &mut report);
        Self::check_storage(config, &mut report);
        Self::check_log(config, &mut report);
        report
    }

    fn check_engine(&self, config: &TransitConfig, report: &mut ValidationReport) {
        let engine = &config.engine;

        if engine.max_concurrency == 0 {
            report.error(
                "engine.max_concurrency",
                IssueCode::OutOfRange,
                "must be at least 1",
            );
        } else if self.strict && engine.max_concurrency > HIGH_CONCURRENCY {
            report.warn(
                "engine.max_concurrency",
                IssueCode::Risky,
                format!("{} concurrent items per batch", engine.max_concurrency),
                "item work is CPU bound, a limit near the core count is enough",
            );
        }

        let key_type = engine.default_key_type.to_lowercase();
        if !KEY_TYPES.contains(&key_type.as_str()) {
            report.error(
                "engine.default_key_type",
                IssueCode::Unsupported,
                format!(
                    "unknown key type {:?}, expected one of: {}",
                    engine.default_key_type,
                    KEY_TYPES.join(", ")
                ),
            );
        }

        if self.strict && engine.upsert_enabled {
            report.warn(
                "engine.upsert_enabled",
                IssueCode::Risky,
                "encrypt requests may create keys",
                "disable upsert and create keys explicitly",
            );
        }
    }

    fn check_storage(config: &TransitConfig, report: &mut ValidationReport) {
        let storage = &config.storage;

        match storage.backend {
            StorageBackend::File if storage.data_dir.as_os_str().is_empty() => {
                report.error(
                    "storage.data_dir",
                    IssueCode::Required,
                    "required by the file backend",
                );
            }
            StorageBackend::File if storage.data_dir.exists() && !storage.data_dir.is_dir() => {
                report.error(
                    "storage.data_dir",
                    IssueCode::WrongKind,
                    format!("{} is not a directory", storage.data_dir.display()),
                );
            }
            StorageBackend::File => {}
            StorageBackend::Memory => {
                report.warn(
                    "storage.backend",
                    IssueCode::Risky,
                    "keys are lost when the process exits",
                    "use the file backend to keep keys across runs",
                );
            }
        }
    }

    fn check_log(config: &TransitConfig, report: &mut ValidationReport) {
        let log = &config.log;

        match log.file_path.as_deref() {
            None if log.output == LogOutput::File => {
                report.error(
                    "log.file_path",
                    IssueCode::Required,
                    "required when log.output is \"file\"",
                );
            }
            Some(path) => {
                let missing_parent = path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty() && !parent.exists());
                if let Some(parent) = missing_parent {
                    report.error(
                        "log.file_path",
                        IssueCode::MissingParent,
                        format!("directory {} does not exist", parent.display()),
                    );
                }
            }
            None => {}
        }
    }
}
