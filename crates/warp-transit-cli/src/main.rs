//! warp-transit CLI - encryption as a service from the command line

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use warp_transit_cli::commands::{self, crypto, keys};
use warp_transit_cli::{Cli, Commands, KeysAction, logging};
use warp_transit_config::{ConfigLoader, DEFAULT_ENV_PREFIX, Validator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new().with_env_prefix(DEFAULT_ENV_PREFIX);
    if let Some(ref path) = cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("Failed to load configuration")?;

    if let Some(level) = logging::verbosity_level(cli.verbose) {
        config.log.level = level;
    }
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    let warnings = Validator::new()
        .validate(&config)
        .into_result()
        .context("Invalid configuration")?;

    logging::init_logging(&config.log)?;
    for warning in warnings {
        warn!("{warning}");
    }

    let engine = commands::open_engine(&config).await?;

    let response = match cli.command {
        Commands::Keys { action } => match action {
            KeysAction::Create {
                name,
                derived,
                key_type,
            } => keys::create(&engine, &name, derived, key_type.as_deref()).await,
            KeysAction::Read { name } => keys::read(&engine, &name).await,
            KeysAction::Rotate { name } => keys::rotate(&engine, &name).await,
            KeysAction::List => keys::list(&engine).await,
            KeysAction::Config {
                name,
                min_decryption_version,
            } => keys::configure(&engine, &name, min_decryption_version).await,
        },
        Commands::Encrypt {
            name,
            input,
            key_type,
            upsert,
        } => crypto::encrypt(&engine, &name, &input, key_type.as_deref(), upsert).await,
        Commands::Decrypt { name, input } => crypto::decrypt(&engine, &name, &input).await,
        Commands::Rewrap { name, input } => crypto::rewrap(&engine, &name, &input).await,
    }?;

    println!("{}", commands::render(&response)?);
    Ok(())
}
