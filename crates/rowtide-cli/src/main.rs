use anyhow::{Context, Result};
use clap::Parser;

mod cli;
mod commands;
mod config;
mod env;
mod records;

use cli::{Cli, Commands};
use config::ProjectConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Records go to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "rowtide=info"
                    .parse()
                    .context("Invalid default log directive")?,
            ),
        )
        .init();

    let cli = Cli::parse();

    env::load_dotenv_from_ancestors(cli.env.as_deref())?;
    let config = ProjectConfig::load(&cli.config)?;

    match cli.command {
        Commands::Input { once } => commands::cmd_input(config, once).await,
        Commands::EnrichStatic => commands::cmd_enrich_static(config).await,
        Commands::EnrichStream => commands::cmd_enrich_stream(config).await,
        Commands::Check => commands::cmd_check(&config),
    }
}
