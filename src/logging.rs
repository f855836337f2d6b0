use std::path::PathBuf;

use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::errors::AppError;
use crate::gatt::gatttool::GATTTOOL_TARGET;
use crate::settings::Settings;

const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024 * 5;
const LOG_FILE_KEEP: usize = 2;

fn timer() -> ChronoLocal {
    ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_owned())
}

/// The configured level, plus raw gatttool traffic when asked for
fn stderr_filter(settings: &Settings) -> Targets {
    let filter = Targets::new().with_default(settings.get_log_level());
    if settings.ble.debug_gatttool {
        filter.with_target(GATTTOOL_TARGET, LevelFilter::DEBUG)
    } else {
        filter
    }
}

/// Sets up the global subscriber: stderr at the configured level,
/// plus a size-rolled log file at DEBUG if one is configured.
///
/// The returned guard flushes the file writer on drop, keep it alive for the whole run.
pub fn init_tracing(settings: &Settings) -> Result<Option<WorkerGuard>, AppError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(timer())
        .with_filter(stderr_filter(settings));

    let (file_layer, guard) = if settings.misc.log_file.trim().is_empty() {
        (None, None)
    } else {
        let path = PathBuf::from(settings.misc.log_file.trim());
        let file_appender = BasicRollingFileAppender::new(
            &path,
            RollingConditionBasic::new().max_size(LOG_FILE_MAX_SIZE),
            LOG_FILE_KEEP,
        )
        .map_err(|source| AppError::CreateFile { path, source })?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_file(false)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer())
            .with_line_number(true)
            .with_filter(LevelFilter::DEBUG);
        (Some(layer), Some(guard))
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
