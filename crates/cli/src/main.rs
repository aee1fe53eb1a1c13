//! Earshot CLI — the main entry point.
//!
//! Commands:
//! - `run`       — Start the readiness poller against the configured store
//! - `say`       — Append a transcript fragment for a user
//! - `insights`  — Print (and consume) a user's insights
//! - `config`    — Show, validate, locate or initialise configuration
//! - `status`    — Show configuration and store status

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "earshot",
    about = "Earshot — decides when a spoken query is complete and answers it",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the readiness poller until Ctrl-C
    Run {
        /// Use an in-memory store instead of the configured one
        #[arg(long)]
        memory: bool,

        /// Read transcript lines for this user from stdin
        #[arg(long, value_name = "USER")]
        stdin: Option<String>,
    },

    /// Append a transcript fragment
    Say {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        device: Option<String>,

        #[arg(short, long)]
        language: Option<String>,

        /// Also enable the explicit-agent feature for the user
        #[arg(long)]
        enable: bool,

        /// The transcribed text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Print a user's insights
    Insights {
        #[arg(short, long)]
        user: String,

        /// Show every insight without consuming anything
        #[arg(long)]
        all: bool,

        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Run { memory, stdin } => commands::run::run(memory, stdin).await?,
        Commands::Say {
            user,
            device,
            language,
            enable,
            text,
        } => commands::say::run(&user, device, language, enable, &text.join(" ")).await?,
        Commands::Insights { user, all, json } => commands::insights::run(&user, all, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
        },
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
