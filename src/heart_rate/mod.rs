pub mod measurement;
pub mod period;

use std::time::Duration;

use uuid::Uuid;

pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

pub const BATTERY_LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

pub const PRIMARY_SERVICE_UUID: Uuid = Uuid::from_u128(0x00002800_0000_1000_8000_00805f9b34fb);
pub const CHARACTERISTIC_DECLARATION_UUID: Uuid =
    Uuid::from_u128(0x00002803_0000_1000_8000_00805f9b34fb);
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Value written to a CCC descriptor to turn on notifications
pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SensorContact {
    #[default]
    NotSupported,
    NoContact,
    Contact,
}

/// One decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reading {
    pub heart_rate: u16,
    /// Raw 1/1024 second ticks, see [`rr_to_duration`]
    pub rr_intervals: Vec<u16>,
    /// Kilojoules
    pub energy_expended: Option<u16>,
    pub sensor_contact: SensorContact,
    pub hr_format_wide: bool,
    /// Seconds since epoch, stamped on receipt
    pub timestamp: i64,
}

impl Reading {
    pub fn with_timestamp(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }
}

pub fn rr_to_duration(raw: u16) -> Duration {
    Duration::from_secs_f64(f64::from(raw) / 1024.0)
}
