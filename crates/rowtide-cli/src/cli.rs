use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rowtide")]
#[command(about = "Incremental SQL ingest and lookup enrichment")]
#[command(version)]
pub struct Cli {
    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Path to the rowtide.toml config file
    #[arg(short, long, global = true, default_value = "rowtide.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the [input] statement and print new rows as JSON lines
    Input {
        /// Run once and exit instead of following the schedule
        #[arg(long)]
        once: bool,
    },

    /// Enrich JSON records from stdin using the local snapshot cache
    EnrichStatic,

    /// Enrich JSON records from stdin with a per-record remote lookup
    EnrichStream,

    /// Validate the config file and print what it would run
    Check,
}
