//! warp-transit CLI library exports
//!
//! Argument definitions, logging setup and command implementations for the
//! `warp-transit` binary.

pub mod commands;
pub mod logging;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "warp-transit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the key storage directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Manage named keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Encrypt base64 plaintext under a named key
    Encrypt {
        /// Key name
        name: String,
        #[command(flatten)]
        input: PayloadArgs,
        /// Key type used if the key is created
        #[arg(long = "type")]
        key_type: Option<String>,
        /// Create the key if it does not exist
        #[arg(long)]
        upsert: bool,
    },
    /// Decrypt ciphertext produced by a named key
    Decrypt {
        /// Key name
        name: String,
        #[command(flatten)]
        input: PayloadArgs,
    },
    /// Re-encrypt ciphertext under the key's latest version
    Rewrap {
        /// Key name
        name: String,
        #[command(flatten)]
        input: PayloadArgs,
    },
}

/// Key management subcommands
#[derive(clap::Subcommand)]
pub enum KeysAction {
    /// Create a key (no-op if it exists)
    Create {
        /// Key name
        name: String,
        /// Require a context for every operation
        #[arg(long)]
        derived: bool,
        /// Key type (aes256-gcm96, chacha20-poly1305)
        #[arg(long = "type")]
        key_type: Option<String>,
    },
    /// Show key metadata
    Read {
        /// Key name
        name: String,
    },
    /// Add a new key version
    Rotate {
        /// Key name
        name: String,
    },
    /// List key names
    List,
    /// Change key settings
    Config {
        /// Key name
        name: String,
        /// Oldest version allowed to decrypt
        #[arg(long)]
        min_decryption_version: Option<u32>,
    },
}

/// Single value or batch input shared by the crypto commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PayloadArgs {
    /// Single base64 value (plaintext or ciphertext, by command)
    #[arg(
        long,
        alias = "plaintext",
        alias = "ciphertext",
        required_unless_present_any = ["batch", "batch_file"]
    )]
    pub value: Option<String>,
    /// Base64-encoded JSON batch
    #[arg(long)]
    pub batch: Option<String>,
    /// JSON batch file, encoded before sending
    #[arg(long, conflicts_with = "batch")]
    pub batch_file: Option<PathBuf>,
    /// Base64 derivation context for a single value
    #[arg(long)]
    pub context: Option<String>,
}
