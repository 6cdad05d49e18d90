//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect cron expressions
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },

    /// Check trigger documents
    Trigger {
        #[command(subcommand)]
        command: TriggerCommands,
    },

    /// Render webhook payloads
    Webhook {
        #[command(subcommand)]
        command: WebhookCommands,
    },

    /// Manage the database
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum CronCommands {
    /// Check an expression against the minimum firing interval
    Validate {
        /// Minute-first expression, e.g. "0/15 * ? * *"
        expression: String,
    },

    /// Print upcoming fire times
    Next {
        expression: String,

        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

#[derive(Subcommand)]
pub enum TriggerCommands {
    /// Run the checks that need no stored state
    Validate {
        /// Path to a trigger YAML document
        path: String,
    },
}

#[derive(Subcommand)]
pub enum WebhookCommands {
    /// Render a payload plan as the sample request body
    Payload {
        /// Path to a payload plan YAML document
        path: String,

        /// Also print a curl call for this token
        #[arg(short, long)]
        token: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Apply pending migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the default configuration file path
    Path,
}
