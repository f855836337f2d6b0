use ble_hrm_logger::errors::AppError;
use ble_hrm_logger::settings::Settings;

use tokio_util::sync::CancellationToken;

use ntest::timeout;

fn load(name: &str) -> Result<Settings, AppError> {
    Settings::load(Some(format!("tests/test_configs/{name}.toml").as_ref()))
}

#[test]
fn misspelled_bool() {
    assert!(matches!(load("misspelled_bool"), Err(AppError::Config(_))));
}

#[test]
fn missing_end_quote() {
    assert!(matches!(load("missing_end_quote"), Err(AppError::Config(_))));
}

#[tokio::test]
#[timeout(3000)] // 3s timeout
async fn inverted_batch_limits() {
    let settings = load("inverted_batch").unwrap();
    let result = ble_hrm_logger::run(settings, CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::InvalidSettings(_))));
}

#[tokio::test]
#[timeout(3000)] // 3s timeout
async fn missing_gatttool() {
    let settings = load("missing_gatttool").unwrap();
    let result = ble_hrm_logger::run(settings, CancellationToken::new()).await;
    assert!(matches!(result, Err(AppError::GatttoolMissing(_))));
}
