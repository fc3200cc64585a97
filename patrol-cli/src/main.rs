use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::{ConfigLoader, Environment};

#[derive(Parser)]
#[command(name = "patrol", about = "WebSocket-to-MQTT bridge for the patrol fleet")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./patrol.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Run the patrol server
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.as_deref())?;

    init_tracing(cli.verbose, config.server.environment);

    match cli.command {
        Commands::Config(args) => commands::config::run(args, &config, cli.config.as_deref()),
        Commands::Serve(args) => commands::serve::run(args, config).await,
    }
}

/// Install the global subscriber; JSON lines in production
fn init_tracing(verbose: bool, environment: Environment) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match environment {
        Environment::Production => subscriber.json().init(),
        Environment::Development => subscriber.init(),
    }
}
