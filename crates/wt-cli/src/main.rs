use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::{report, run, settings, status};
use wt_cli::{Cli, Commands, Config};
use wt_core::{SystemClock, day_key};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(wt_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = wt_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut stdout = std::io::stdout().lock();

    match &cli.command {
        Some(Commands::Run) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let _lock = run::acquire_lock(&config.lock_path())?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = runtime.block_on(run::run(
                input,
                Arc::new(db),
                Arc::new(SystemClock),
                config.alarm_interval(),
            ))?;
            tracing::debug!(?summary, "run finished");
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config.database_path, Utc::now())?;
        }
        Some(Commands::Report { date, json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            let date = date.unwrap_or_else(|| day_key(Utc::now()));
            report::run(&mut stdout, &db, date, *json)?;
        }
        Some(Commands::Exclude { domain }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            settings::exclude(&mut stdout, &db, domain)?;
        }
        Some(Commands::Include { domain }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            settings::include(&mut stdout, &db, domain)?;
        }
        Some(Commands::Settings {
            granularity_ms,
            retain_private,
        }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            settings::run(&mut stdout, &db, *granularity_ms, *retain_private)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
