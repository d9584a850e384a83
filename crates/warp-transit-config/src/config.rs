//! Layered configuration loading
//!
//! Sources are applied in the order they are added to a [`ConfigLoader`],
//! on top of the built-in defaults. A TOML source only overrides the keys
//! it actually contains, so a file that sets `engine.max_concurrency`
//! leaves an environment-provided log level in place.

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "WARP_TRANSIT";

/// Key types the engine can create
pub const KEY_TYPES: &[&str] = &["aes256-gcm96", "chacha20-poly1305"];

/// One layer of configuration input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// TOML file
    File(PathBuf),
    /// Prefixed environment variables
    Env,
    /// Built-in defaults
    Default,
    /// Inline TOML
    Memory(String),
}

/// Case-insensitive parsing and display for settings with a fixed set of
/// spellings
macro_rules! choice {
    ($ty:ident, $field:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Accepted spellings
            pub const NAMES: &'static [&'static str] = &[$($name),+];

            /// Canonical spelling
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(ConfigError::InvalidValue {
                        field: $field.to_string(),
                        value: s.to_string(),
                        expected: Self::NAMES.join(", "),
                    }),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Minimum level of emitted log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-item detail
    Trace,
    /// Batch summaries
    Debug,
    /// Key lifecycle events
    Info,
    /// Problems that do not fail a command
    #[default]
    Warn,
    /// Failures only
    Error,
}

choice!(LogLevel, "log.level", {
    Trace => "trace",
    Debug => "debug",
    Info => "info",
    Warn => "warn",
    Error => "error",
});

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line human-readable events
    Pretty,
    /// Single-line human-readable events
    #[default]
    Compact,
}

choice!(LogFormat, "log.format", {
    Json => "json",
    Pretty => "pretty",
    Compact => "compact",
});

/// Log destination
///
/// Command output goes to stdout, so logs default to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output
    Stdout,
    /// Standard error
    #[default]
    Stderr,
    /// Append to `log.file_path`
    File,
}

choice!(LogOutput, "log.output", {
    Stdout => "stdout",
    Stderr => "stderr",
    File => "file",
});

/// Policy storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Policies live only for the lifetime of the process
    Memory,
    /// One JSON file per policy under `data_dir`
    #[default]
    File,
}

choice!(StorageBackend, "storage.backend", {
    Memory => "memory",
    File => "file",
});

/// `[engine]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Batch items in flight at once, shared by every request the engine serves
    pub max_concurrency: usize,
    /// Per-item time limit in milliseconds, 0 for none
    pub item_timeout_ms: u64,
    /// Whether encrypt may create missing keys
    pub upsert_enabled: bool,
    /// Key type for keys created without an explicit type
    pub default_key_type: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            item_timeout_ms: 0,
            upsert_enabled: true,
            default_key_type: "aes256-gcm96".to_string(),
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where policies are persisted
    pub backend: StorageBackend,
    /// Policy directory for the file backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            backend: StorageBackend::File,
            data_dir: home.join(".warp-transit").join("keys"),
        }
    }
}

/// `[log]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level, overridden by `RUST_LOG` when set
    pub level: LogLevel,
    /// Line format
    pub format: LogFormat,
    /// Destination
    pub output: LogOutput,
    /// Target of [`LogOutput::File`]
    pub file_path: Option<PathBuf>,
}

/// Top-level transit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TransitConfig {
    /// Batch processing and key creation defaults
    pub engine: EngineSettings,
    /// Policy persistence
    pub storage: StorageConfig,
    /// Diagnostics
    pub log: LogConfig,
}

/// Builds a [`TransitConfig`] from an ordered list of sources
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Loader with only the built-in defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: vec![ConfigSource::Default],
            env_prefix: None,
        }
    }

    /// Layer a TOML file; a missing file is an error
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add an in-memory TOML source
    pub fn with_toml(mut self, content: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Memory(content.into()));
        self
    }

    /// Layer `{prefix}_*` environment variables
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.sources.push(ConfigSource::Env);
        self
    }

    /// Apply every source in order and expand `~` in paths
    pub fn load(&self) -> Result<TransitConfig> {
        let mut config = TransitConfig::default();

        for source in &self.sources {
            match source {
                ConfigSource::Default => {}
                ConfigSource::File(path) => {
                    let content = std::fs::read_to_string(path)?;
                    config = Self::merge_toml(config, &content)?;
                }
                ConfigSource::Env => {
                    if let Some(prefix) = &self.env_prefix {
                        config = Self::apply_env_overrides(config, prefix)?;
                    }
                }
                ConfigSource::Memory(content) => {
                    config = Self::merge_toml(config, content)?;
                }
            }
        }

        Ok(Self::expand_paths(config))
    }

    /// Parse a complete TOML document with no other layers
    pub fn load_from_str(toml: &str) -> Result<TransitConfig> {
        let config: TransitConfig =
            toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self::expand_paths(config))
    }

    /// Built-in defaults
    #[must_use]
    pub fn default_config() -> TransitConfig {
        TransitConfig::default()
    }

    /// Overlay the keys present in a TOML document onto a configuration
    fn merge_toml(base: TransitConfig, content: &str) -> Result<TransitConfig> {
        let overlay: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let toml::Value::Table(mut merged) =
            toml::Value::try_from(&base).map_err(|e| ConfigError::Parse(e.to_string()))?
        else {
            return Err(ConfigError::Parse("configuration is not a table".to_string()));
        };

        Self::merge_tables(&mut merged, overlay);

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }

    fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
        for (key, value) in overlay {
            match (base.get_mut(&key), value) {
                (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                    Self::merge_tables(existing, nested);
                }
                (_, value) => {
                    base.insert(key, value);
                }
            }
        }
    }

    /// Apply `{prefix}_{SECTION}_{FIELD}` environment variables
    fn apply_env_overrides(mut config: TransitConfig, prefix: &str) -> Result<TransitConfig> {
        let env = EnvOverrides { prefix };

        env.apply("ENGINE_MAX_CONCURRENCY", &mut config.engine.max_concurrency)?;
        env.apply("ENGINE_ITEM_TIMEOUT_MS", &mut config.engine.item_timeout_ms)?;
        env.apply("ENGINE_UPSERT_ENABLED", &mut config.engine.upsert_enabled)?;
        env.apply("ENGINE_DEFAULT_KEY_TYPE", &mut config.engine.default_key_type)?;

        env.apply("STORAGE_BACKEND", &mut config.storage.backend)?;
        env.apply("STORAGE_DATA_DIR", &mut config.storage.data_dir)?;

        env.apply("LOG_LEVEL", &mut config.log.level)?;
        env.apply("LOG_FORMAT", &mut config.log.format)?;
        env.apply("LOG_OUTPUT", &mut config.log.output)?;
        if let Some((_, value)) = env.get("LOG_FILE_PATH") {
            config.log.file_path = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    fn expand_paths(mut config: TransitConfig) -> TransitConfig {
        config.storage.data_dir = Self::expand_path(&config.storage.data_dir);
        if let Some(ref path) = config.log.file_path {
            config.log.file_path = Some(Self::expand_path(path));
        }
        config
    }

    /// `~/x` becomes `$HOME/x`
    fn expand_path(path: &Path) -> PathBuf {
        if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        path.to_path_buf()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

struct EnvOverrides<'a> {
    prefix: &'a str,
}

impl EnvOverrides<'_> {
    fn get(&self, key: &str) -> Option<(String, String)> {
        let var = format!("{}_{key}", self.prefix);
        std::env::var(&var).ok().map(|value| (var, value))
    }

    /// Replace `target` when the variable is set, leaving it untouched otherwise
    fn apply<T: FromStr>(&self, key: &str, target: &mut T) -> Result<()> {
        if let Some((var, value)) = self.get(key) {
            *target = value
                .parse()
                .map_err(|_| ConfigError::EnvVar { var, value })?;
        }
        Ok(())
    }
}
