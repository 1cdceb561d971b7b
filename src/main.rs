//! FloodGuard - Connection-flood detector and auto-blocker for Linux hosts

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use floodguard::cli::{Cli, Commands};
use floodguard::config::{Config, LogConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The monitor honours the log section; one-shot commands log to stderr
    let log_config = match cli.command {
        Commands::Start => Config::load(&cli.config)
            .map(|c| c.log)
            .unwrap_or_default(),
        _ => LogConfig::default(),
    };
    let daemon = matches!(cli.command, Commands::Start);
    init_logging(&cli, &log_config, daemon)?;

    match cli.command {
        Commands::Start => floodguard::commands::start::run(&cli.config).await,
        Commands::Status => floodguard::commands::status::run(&cli.config).await,
        Commands::List => floodguard::commands::list::run(&cli.config).await,
        Commands::Unblock { ref target } => {
            floodguard::commands::unblock::run(target, &cli.config).await
        }
        Commands::Check { ref ip } => floodguard::commands::check::run(ip, &cli.config).await,
        Commands::Init {
            ref public_ip,
            no_detect,
            force,
        } => {
            floodguard::commands::init::run(public_ip.as_deref(), !no_detect, force, &cli.config)
                .await
        }
        Commands::Version => {
            println!("floodguard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(cli: &Cli, log: &LogConfig, daemon: bool) -> Result<()> {
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        log.level.parse().unwrap_or(Level::INFO)
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false);

    if !daemon {
        let subscriber = builder
            .without_time()
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    match (log.format, log.file.as_deref()) {
        (LogFormat::Json, Some(path)) => {
            let subscriber = builder
                .json()
                .with_writer(Mutex::new(open_log_file(path)?))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        (LogFormat::Json, None) => {
            tracing::subscriber::set_global_default(builder.json().finish())?;
        }
        (LogFormat::Text, Some(path)) => {
            let subscriber = builder
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        (LogFormat::Text, None) => {
            tracing::subscriber::set_global_default(builder.finish())?;
        }
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))
}
