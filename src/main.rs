use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ble_hrm_logger::args::TopLevelCmd;
use ble_hrm_logger::errors::AppError;
use ble_hrm_logger::logging::init_tracing;
use ble_hrm_logger::settings::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    let args: TopLevelCmd = argh::from_env();

    let mut settings = match Settings::load(args.config_override.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    settings.apply_args(&args);

    // Held until exit so the log file gets flushed
    let _guard = match init_tracing(&settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), AppError> {
    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    let cancel_token = CancellationToken::new();

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, stopping...");
                ctrl_c_token.cancel();
            }
            Err(e) => warn!("Couldn't listen for Ctrl-C: {e}"),
        }
    });

    ble_hrm_logger::run(settings, cancel_token).await?;
    info!("Shutting down gracefully...");
    Ok(())
}
