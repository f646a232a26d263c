//! rbc-admin - operator CLI for the Baldrick Rebec PostgreSQL store
//!
//! - `db`: provisioning (plan, scaffold, reset, revoke), graph extension
//!   setup, status and logical backup/restore
//! - `stickie-rel`: relationships between stickies, kept in the graph with a
//!   relational fallback
//!
//! Results are JSON on stdout. Logs and prompts go to stderr.

mod backup;
mod commands;
mod config;
mod db;
mod error;
mod provisioning;
mod relationship;
mod schema;

use crate::commands::{db::DbCommands, stickie_rel::StickieRelCommands};
use crate::config::Settings;
use crate::db::ConnectionProvider;
use crate::error::AppError;
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Baldrick Rebec database administration")]
struct Cli {
    /// Configuration file. Defaults to $BALDRICK_REBEC_HOME_DIR/config.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision, inspect, back up and restore the database
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Manage relationships between stickies
    #[command(name = "stickie-rel", alias = "stickie_rel")]
    StickieRel {
        #[command(subcommand)]
        command: StickieRelCommands,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            let e = AppError::Config(format!("{:#}", e));
            error!("{}", e);
            fail(&e, cli.log_format);
        }
    };

    let provider = ConnectionProvider::new(&settings.postgres);
    let result = match cli.command {
        Commands::Db { command } => commands::db::execute(&settings, &provider, command).await,
        Commands::StickieRel { command } => {
            commands::stickie_rel::execute(&settings, &provider, command).await
        }
    };
    provider.close().await;

    if let Err(e) = result {
        debug!("command failed: {:?}", e);
        fail(&e, cli.log_format);
    }
}

/// Report `e` on stderr in the selected format and exit with its code
fn fail(e: &AppError, format: LogFormat) -> ! {
    match format {
        LogFormat::Text => eprintln!("error[{}]: {}", e.code(), e),
        LogFormat::Json => match serde_json::to_string(&e.to_response()) {
            Ok(body) => eprintln!("{}", body),
            Err(_) => eprintln!("error[{}]: {}", e.code(), e),
        },
    }
    std::process::exit(e.exit_code())
}

fn load_settings(path: Option<&std::path::Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Settings::load().with_context(|| {
            format!(
                "loading configuration from {}",
                config::config_path().display()
            )
        }),
    }
}

/// Structured logging on stderr so stdout stays machine readable
fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbose)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
    }
}
