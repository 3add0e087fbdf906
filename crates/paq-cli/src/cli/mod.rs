//! CLI for the paq acquisition engine.

mod commands;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use paq_core::config;
use std::path::PathBuf;

use commands::{run_checksum, run_fetch, run_probe};

/// Top-level CLI for the paq package fetcher.
#[derive(Debug, Parser)]
#[command(name = "paq")]
#[command(about = "paq: method-driven package acquisition engine", long_about = None)]
pub struct Cli {
    /// Override the configured methods directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub methods_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more URIs through their access methods.
    Fetch {
        /// URIs to acquire (scheme selects the method, e.g. http://, file://).
        #[arg(required = true)]
        uris: Vec<String>,

        /// Directory to place downloaded files in (default: current dir).
        #[arg(long, short = 'd', value_name = "DIR")]
        dest_dir: Option<PathBuf>,

        /// Expected SHA-256 of the file (single-URI fetches only).
        #[arg(long, value_name = "HEX")]
        sha256: Option<String>,

        /// Progress pulse interval in milliseconds.
        #[arg(long, default_value = "500", value_name = "MS")]
        pulse_ms: u64,

        /// Abort the whole run after this many seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },

    /// Probe an access method and print its negotiated capabilities.
    Probe {
        /// Access-method name (http, ftp, file, ...).
        access: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        if let Some(dir) = cli.methods_dir {
            cfg.methods_dir = dir;
        }
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                uris,
                dest_dir,
                sha256,
                pulse_ms,
                timeout,
            } => run_fetch(cfg, uris, dest_dir, sha256, pulse_ms, timeout).await,
            CliCommand::Checksum { path } => run_checksum(&path),
            CliCommand::Probe { access } => run_probe(cfg, &access).await,
        }
    }
}
