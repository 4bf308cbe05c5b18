//! Graph Gateway - authenticating tool-call gateway for Microsoft Graph

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use graph_gateway::{cli::Cli, config::Config, gateway::Gateway, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    // Load a .env file when present, before config extraction
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.listen_port = port;
            }
            if let Some(ref host) = cli.host {
                config.listen_host.clone_from(host);
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.listen_port,
        cache_mode = ?config.cache_mode,
        oidc_validation = !config.disable_oidc_validation,
        "Starting Graph gateway"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
