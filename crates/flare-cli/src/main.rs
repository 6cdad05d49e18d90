//! Flare CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands, CronCommands, DbCommands, TriggerCommands, WebhookCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "flare")]
#[command(author, version, about = "Flare trigger engine command-line interface", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user configuration directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_json);

    let path = match cli.config {
        Some(path) => path,
        None => CliConfig::default_path()?,
    };
    let config = CliConfig::load(&path)?;

    match cli.command {
        Commands::Cron { command } => match command {
            CronCommands::Validate { expression } => handlers::cron_validate(&config, &expression)?,
            CronCommands::Next { expression, count } => {
                handlers::cron_next(&config, &expression, count)?
            }
        },
        Commands::Trigger { command } => match command {
            TriggerCommands::Validate { path } => handlers::trigger_validate(&config, &path)?,
        },
        Commands::Webhook { command } => match command {
            WebhookCommands::Payload { path, token } => {
                handlers::webhook_payload(&config, &path, token)?
            }
        },
        Commands::Db { command } => match command {
            DbCommands::Migrate => handlers::db_migrate(&config).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Path => handlers::config_path()?,
        },
    }

    Ok(())
}
