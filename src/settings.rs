use config::{Config, File as ConfigFile};
use serde_derive::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

use crate::args::TopLevelCmd;
use crate::errors::AppError;
use crate::gatt::{BleAddress, Handle};
use crate::session::SessionTimeouts;
use crate::storage::scheduler::{
    BatchLimits, DEFAULT_GRACE_RATIO, DEFAULT_INITIAL_BATCH, DEFAULT_MAX_BATCH, DEFAULT_MIN_BATCH,
};

const DEFAULT_GATTTOOL: &str = "gatttool";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct BleSettings {
    /// Empty means auto-discovery
    pub address: String,
    pub gatttool: String,
    pub hcitool: String,
    pub check_battery: bool,
    /// Empty means the handle is discovered through `char-desc`
    pub hr_handle: String,
    pub debug_gatttool: bool,
    /// Scan again on reconnect if the address came from a scan
    pub rediscover_on_reconnect: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct StorageSettings {
    /// Empty means readings are only logged
    pub output: String,
    pub min_batch: u32,
    pub max_batch: u32,
    pub initial_batch: u32,
    pub grace_ratio: f64,
}

/// All in seconds
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    pub scan: u64,
    pub scan_backoff: u64,
    pub connect: u64,
    pub battery: u64,
    pub descriptors: u64,
    pub notification: u64,
    pub reconnect_pause: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct MiscSettings {
    log_level: String,
    /// Empty disables the log file
    pub log_file: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub ble: BleSettings,
    pub storage: StorageSettings,
    pub timeouts: TimeoutSettings,
    pub misc: MiscSettings,
}

impl Settings {
    /// Loads the config file, falling back to defaults for anything it doesn't set.
    ///
    /// Without an override, `<exe>.toml` is read if it exists. An override must exist.
    pub fn load(config_override: Option<&Path>) -> Result<Self, AppError> {
        let (config_path, required) = match config_override {
            Some(path) => (path.to_path_buf(), true),
            None => (env::current_exe()?.with_extension("toml"), false),
        };

        let default_log_level = if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        };

        let s = Config::builder()
            .add_source(ConfigFile::from(config_path).required(required))
            .set_default("ble.address", "")?
            .set_default("ble.gatttool", DEFAULT_GATTTOOL)?
            .set_default("ble.hcitool", "hcitool")?
            .set_default("ble.check_battery", false)?
            .set_default("ble.hr_handle", "")?
            .set_default("ble.debug_gatttool", false)?
            .set_default("ble.rediscover_on_reconnect", false)?
            .set_default("storage.output", "")?
            .set_default("storage.min_batch", i64::from(DEFAULT_MIN_BATCH))?
            .set_default("storage.max_batch", i64::from(DEFAULT_MAX_BATCH))?
            .set_default("storage.initial_batch", i64::from(DEFAULT_INITIAL_BATCH))?
            .set_default("storage.grace_ratio", DEFAULT_GRACE_RATIO)?
            .set_default("timeouts.scan", 20)?
            .set_default("timeouts.scan_backoff", 20)?
            .set_default("timeouts.connect", 30)?
            .set_default("timeouts.battery", 10)?
            .set_default("timeouts.descriptors", 10)?
            .set_default("timeouts.notification", 10)?
            .set_default("timeouts.reconnect_pause", 1)?
            .set_default("misc.log_level", default_log_level)?
            .set_default("misc.log_file", "")?
            .build()?;

        Ok(s.try_deserialize()?)
    }

    /// Command line values win over the config file
    pub fn apply_args(&mut self, args: &TopLevelCmd) {
        if let Some(address) = &args.address {
            self.ble.address = address.clone();
        }
        if let Some(gatttool) = &args.gatttool {
            self.ble.gatttool = gatttool.display().to_string();
        }
        if let Some(output) = &args.output {
            self.storage.output = output.display().to_string();
        }
        if let Some(hr_handle) = &args.hr_handle {
            self.ble.hr_handle = hr_handle.clone();
        }
        self.ble.check_battery |= args.check_battery;
        self.ble.debug_gatttool |= args.debug_gatttool;
        if args.verbose {
            self.misc.log_level = "debug".into();
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.ble.gatttool != DEFAULT_GATTTOOL && !Path::new(&self.ble.gatttool).exists() {
            return Err(AppError::GatttoolMissing(self.ble.gatttool.clone().into()));
        }
        self.address()?;
        self.hr_handle()?;
        let storage = &self.storage;
        if storage.min_batch == 0 {
            return Err(AppError::InvalidSettings(
                "storage.min_batch must be at least 1".into(),
            ));
        }
        if storage.min_batch > storage.max_batch {
            return Err(AppError::InvalidSettings(format!(
                "storage.min_batch ({}) is larger than storage.max_batch ({})",
                storage.min_batch, storage.max_batch
            )));
        }
        if storage.grace_ratio.is_nan() || storage.grace_ratio <= 0.0 {
            return Err(AppError::InvalidSettings(format!(
                "storage.grace_ratio must be positive, got {}",
                storage.grace_ratio
            )));
        }
        Ok(())
    }

    pub fn address(&self) -> Result<Option<BleAddress>, AppError> {
        non_empty(&self.ble.address).map(str::parse).transpose()
    }

    pub fn hr_handle(&self) -> Result<Option<Handle>, AppError> {
        non_empty(&self.ble.hr_handle).map(str::parse).transpose()
    }

    pub fn output(&self) -> Option<PathBuf> {
        non_empty(&self.storage.output).map(PathBuf::from)
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            min_batch: self.storage.min_batch,
            max_batch: self.storage.max_batch,
            grace_ratio: self.storage.grace_ratio,
        }
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        let t = &self.timeouts;
        SessionTimeouts {
            scan: Duration::from_secs(t.scan),
            scan_backoff: Duration::from_secs(t.scan_backoff),
            connect: Duration::from_secs(t.connect),
            battery: Duration::from_secs(t.battery),
            descriptors: Duration::from_secs(t.descriptors),
            notification: Duration::from_secs(t.notification),
            reconnect_pause: Duration::from_secs(t.reconnect_pause),
        }
    }

    pub fn get_log_level(&self) -> LevelFilter {
        match self.misc.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}
