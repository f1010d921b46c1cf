// Desktop/tooling crate — unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod check;
mod inspect;
mod sample_blob;
mod test;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "smartamp development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a tuning image and print its sections, profiles and controls
    Inspect {
        /// Tuning image (bare payload or revision container)
        blob: PathBuf,
        /// Revision to select from a container
        #[arg(long, default_value_t = 0)]
        revision: u32,
        /// Emit a JSON summary instead of the table
        #[arg(long)]
        json: bool,
    },
    /// Write a two-channel demonstration image
    SampleBlob {
        /// Output file
        out: PathBuf,
        /// Wrap the payload in a revision container with this revision id
        #[arg(long)]
        revision: Option<u32>,
    },
    /// Check the workspace builds on host and without std
    Check,
    /// Run all tests (unit and integration)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { blob, revision, json } => inspect::run(&blob, revision, json),
        Commands::SampleBlob { out, revision } => sample_blob::run(&out, revision),
        Commands::Check => check::run(),
        Commands::Test { unit, integration } => test::run(unit, integration),
    }
}
