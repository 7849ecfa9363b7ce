//! meterbridge adapter binary

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use meterbridge_adapter::{daemon, telemetry, AdapterConfig, CliArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match AdapterConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to read configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Guard flushes the file log on exit
    let _guard = match telemetry::init_tracing(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match daemon::run(config).await {
        Ok(()) => {
            info!("Shutting down...");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Adapter terminated");
            ExitCode::FAILURE
        }
    }
}
