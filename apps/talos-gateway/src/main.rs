//! `talosd`: thin CLI shell around `bootstrap::build`. The HTTP/WebSocket
//! API and broader process supervision live outside this binary; this
//! entrypoint only loads config, starts the pipeline, and waits for a
//! shutdown signal.

mod alerts;
mod bootstrap;
mod control;
mod device_table;
mod errors;
mod monitor;
mod rtu_bus;
mod subscriber_registry;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "talosd", about = "Talos edge gateway")]
struct Cli {
    /// Directory containing the YAML config files.
    #[arg(long, env = "TALOS_CONFIG_DIR", default_value = "./config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway pipeline (default when no subcommand is given).
    Run,
    /// Load and validate config, printing errors, without starting anything.
    CheckConfig,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return std::process::ExitCode::from(1);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => runtime.block_on(run_check_config(&cli.config_dir)),
        Command::Run => runtime.block_on(run_gateway(&cli.config_dir)),
    }
}

async fn run_check_config(config_dir: &std::path::Path) -> std::process::ExitCode {
    match talos_shared_config::TalosConfig::load_all(config_dir) {
        Ok(config) => {
            info!(devices = config.devices.len(), "config loaded and validated successfully");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "config validation failed");
            std::process::ExitCode::from(1)
        }
    }
}

async fn run_gateway(config_dir: &std::path::Path) -> std::process::ExitCode {
    let config = match talos_shared_config::TalosConfig::load_all(config_dir) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "fatal: could not load config, aborting startup");
            return std::process::ExitCode::from(1);
        }
    };

    let drain = Duration::from_secs_f64(config.system.shutdown_drain_timeout_sec);

    let gateway = match bootstrap::build(&config, config_dir).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "fatal: gateway bootstrap failed");
            return std::process::ExitCode::from(1);
        }
    };

    info!("talos gateway running, press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler, shutting down anyway");
    }

    info!("shutdown signal received, draining in-flight work");
    gateway.shutdown(drain).await;
    info!("talos gateway stopped");
    std::process::ExitCode::SUCCESS
}
