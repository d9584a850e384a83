//! Tracing subscriber setup

use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;
use warp_transit_config::{LogConfig, LogFormat, LogLevel, LogOutput};

/// Level selected by `-v` flags, if any
pub fn verbosity_level(verbose: u8) -> Option<LogLevel> {
    match verbose {
        0 => None,
        1 => Some(LogLevel::Info),
        2 => Some(LogLevel::Debug),
        _ => Some(LogLevel::Trace),
    }
}

/// Install the global subscriber; `RUST_LOG` wins over the configured level
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    match config.output {
        LogOutput::Stdout => apply_fmt(config.format, std::io::stdout, filter),
        LogOutput::Stderr => apply_fmt(config.format, std::io::stderr, filter),
        LogOutput::File => {
            let path = config
                .file_path
                .as_ref()
                .ok_or_else(|| anyhow!("log output is 'file' but no file_path is set"))?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            apply_fmt(config.format, Mutex::new(file), filter)
        }
    }
}

fn apply_fmt<W>(format: LogFormat, writer: W, filter: EnvFilter) -> Result<()>
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let init_result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(writer)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_writer(writer)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_writer(writer)
            .with_env_filter(filter)
            .try_init(),
    };
    init_result.map_err(|e| anyhow!("Failed to init subscriber: {e}"))
}
