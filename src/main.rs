//! ARCAD conversion server
//!
//! Loads configuration, sets up logging, and serves the CAD-to-GLB API.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use arcad_core::config::AppConfig;
use arcad_core::error::AppError;

/// Command-line options. Each can also come from the environment.
#[derive(Debug, Parser)]
#[command(name = "arcad-server", version, about = "CAD to GLB conversion server")]
struct Cli {
    /// Directory holding `default.toml` and the per-environment overlays.
    #[arg(long, env = "ARCAD_CONFIG_DIR", default_value = "config")]
    config_dir: String,

    /// Environment overlay to load (`config/<env>.toml`).
    #[arg(long, env = "ARCAD_ENV", default_value = "development")]
    env: String,

    /// Override the listening port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(
        config_dir = %cli.config_dir,
        env = %cli.env,
        "Starting ARCAD v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = arcad_api::run_server(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load layered configuration and apply command-line overrides.
fn load_configuration(cli: &Cli) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load(&cli.config_dir, &cli.env)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}
