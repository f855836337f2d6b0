#![deny(unused_must_use)]

use tokio_util::sync::CancellationToken;
use tracing::info;

use errors::AppError;
use gatt::gatttool::GatttoolConnector;
use scan::HcitoolScanner;
use session::{Session, SessionOptions};
use settings::Settings;
use storage::scheduler::CommitScheduler;
use storage::sqlite::SqliteSink;

pub mod args;
pub mod errors;
pub mod gatt;
pub mod heart_rate;
pub mod logging;
pub mod scan;
pub mod session;
pub mod settings;
pub mod storage;

/// Logs heart rate data with gatttool/hcitool until `cancel_token` fires or something fatal happens.
pub async fn run(settings: Settings, cancel_token: CancellationToken) -> Result<(), AppError> {
    settings.validate()?;

    let scheduler = match settings.output() {
        Some(path) => Some(CommitScheduler::new(
            SqliteSink::open(&path)?,
            settings.batch_limits(),
            settings.storage.initial_batch,
        )),
        None => {
            info!("No output database set, heart rate will only be logged");
            None
        }
    };

    let options = SessionOptions {
        address: settings.address()?,
        hr_handle: settings.hr_handle()?,
        check_battery: settings.ble.check_battery,
        rediscover_on_reconnect: settings.ble.rediscover_on_reconnect,
        timeouts: settings.session_timeouts(),
    };
    let connector = GatttoolConnector::new(
        settings.ble.gatttool.clone().into(),
        settings.ble.debug_gatttool,
    );
    let scanner = HcitoolScanner::new(settings.ble.hcitool.clone().into());

    let mut session = Session::new(options, connector, scanner, scheduler, cancel_token);
    session.run().await
}
