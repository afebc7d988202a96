//! kcache - cached kernel package builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kcache::cli::{Cli, Commands, ConfigAction, ConfigArgs};
use kcache::config::{Config, ConfigManager};
use kcache::error::{KcacheError, KcacheResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins
fn init_logging(verbose: u8, config: &Config) {
    let default = match verbose {
        0 => "kcache=warn",
        1 => "kcache=info",
        _ => "kcache=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.with_target(false).without_time().init();
    }
}

async fn run() -> KcacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // These work without an existing config file
    let needs_file = !matches!(
        cli.command,
        Commands::Config(ConfigArgs {
            action: Some(ConfigAction::Init { .. } | ConfigAction::Path)
        })
    );
    if cli.config.is_some() && needs_file && !config_manager.path().exists() {
        return Err(KcacheError::ConfigNotFound(config_manager.path().to_path_buf()));
    }

    let config = if needs_file {
        config_manager.load().await?
    } else {
        Config::default()
    };

    init_logging(cli.verbose, &config);
    kcache::ui::init_theme();
    debug!("Configuration: {}", config_manager.path().display());

    match cli.command {
        Commands::Package(args) => kcache::cli::commands::package(args, &config).await,
        Commands::Cache(args) => kcache::cli::commands::cache(args, &config).await,
        Commands::Install(args) => kcache::cli::commands::install(args, &config).await,
        Commands::Config(args) => {
            kcache::cli::commands::config(args, &config_manager, &config).await
        }
    }
}
