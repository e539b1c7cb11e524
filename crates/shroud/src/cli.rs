//! Command line interface definition.

use clap::{Parser, Subcommand};

/// Shroud: an encrypting gateway in front of an S3-compatible object store.
#[derive(Parser)]
#[command(name = "shroud")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway, configured from the environment.
    Serve,
    /// Derive a fresh 32-byte key from random password and salt bytes.
    GenKeys,
    /// Print version information.
    Version,
}
