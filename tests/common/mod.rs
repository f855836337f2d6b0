#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use ble_hrm_logger::errors::{ChannelError, ScanError, StorageError};
use ble_hrm_logger::gatt::protocol::{GattCommand, GattEvent};
use ble_hrm_logger::gatt::{BleAddress, Connector, ControlChannel, Handle};
use ble_hrm_logger::heart_rate::Reading;
use ble_hrm_logger::scan::Scanner;
use ble_hrm_logger::storage::{CommitMetadata, StorageSink};

pub const MEASUREMENT_HANDLE: Handle = Handle(0x000e);
pub const CCC_HANDLE: Handle = Handle(0x000f);

pub fn uuid16(short: u32) -> Uuid {
    Uuid::from_u128((u128::from(short) << 96) | 0x0000_1000_8000_00805f9b34fb)
}

/// Attribute listing of a typical chest strap
pub fn hrm_descriptors() -> Vec<(Handle, Uuid)> {
    vec![
        (Handle(0x0001), uuid16(0x2800)),
        (Handle(0x0002), uuid16(0x2803)),
        (Handle(0x0003), uuid16(0x2a00)),
        (Handle(0x000c), uuid16(0x2800)),
        (Handle(0x000d), uuid16(0x2803)),
        (MEASUREMENT_HANDLE, uuid16(0x2a37)),
        (CCC_HANDLE, uuid16(0x2902)),
        (Handle(0x0010), uuid16(0x2803)),
        (Handle(0x0011), uuid16(0x2a38)),
    ]
}

/// Flags 0x10: 8 bit heart rate followed by one RR interval
pub fn hr_payload(bpm: u8, rr: u16) -> Vec<u8> {
    let [lo, hi] = rr.to_le_bytes();
    vec![0x10, bpm, lo, hi]
}

/// How one scripted connection attempt behaves
#[derive(Debug, Clone)]
pub struct Device {
    pub connects: bool,
    pub battery: Option<u8>,
    pub descriptors: Vec<(Handle, Uuid)>,
    /// Notifications start on connect instead of after the CCC write
    pub notifies_unprompted: bool,
    pub notifications: Vec<Vec<u8>>,
    pub interval: Duration,
    /// Once out of notifications: true closes the channel, false goes silent
    pub hang_up: bool,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            connects: true,
            battery: None,
            descriptors: hrm_descriptors(),
            notifies_unprompted: false,
            notifications: Vec::new(),
            interval: Duration::from_secs(1),
            hang_up: false,
        }
    }
}

impl Device {
    pub fn streaming(count: u8) -> Self {
        Self {
            notifications: (0..count).map(|i| hr_payload(60 + i, 1000)).collect(),
            ..Self::default()
        }
    }
}

/// Everything the session did to the scripted devices
#[derive(Debug, Default)]
pub struct Log {
    pub opened: Vec<BleAddress>,
    pub sent: Vec<String>,
    pub closed: usize,
    pub scans: usize,
    pub commits: usize,
}

pub type SharedLog = Arc<Mutex<Log>>;

/// Plays one `Device` per `open`. Out of devices, channels never connect.
pub struct ScriptedConnector {
    devices: VecDeque<Device>,
    log: SharedLog,
}

impl ScriptedConnector {
    pub fn new(devices: impl IntoIterator<Item = Device>, log: SharedLog) -> Self {
        Self {
            devices: devices.into_iter().collect(),
            log,
        }
    }
}

impl Connector for ScriptedConnector {
    type Channel = ScriptedChannel;

    async fn open(&mut self, address: &BleAddress) -> Result<ScriptedChannel, ChannelError> {
        self.log.lock().unwrap().opened.push(*address);
        let device = self.devices.pop_front().unwrap_or(Device {
            connects: false,
            ..Device::default()
        });
        Ok(ScriptedChannel {
            device,
            queue: VecDeque::new(),
            last_deadline: Instant::now(),
            log: self.log.clone(),
        })
    }
}

pub struct ScriptedChannel {
    device: Device,
    queue: VecDeque<(Instant, GattEvent)>,
    last_deadline: Instant,
    log: SharedLog,
}

impl ScriptedChannel {
    fn push(&mut self, delay: Duration, event: GattEvent) {
        let deadline = self.last_deadline.max(Instant::now()) + delay;
        self.last_deadline = deadline;
        self.queue.push_back((deadline, event));
    }

    fn start_notifications(&mut self) {
        for bytes in self.device.notifications.clone() {
            self.push(
                self.device.interval,
                GattEvent::Notification {
                    handle: MEASUREMENT_HANDLE,
                    bytes,
                },
            );
        }
    }
}

impl ControlChannel for ScriptedChannel {
    async fn send(&mut self, command: GattCommand) -> Result<(), ChannelError> {
        self.log.lock().unwrap().sent.push(command.to_string());
        match command {
            GattCommand::Connect if self.device.connects => {
                self.push(Duration::ZERO, GattEvent::Other("Attempting to connect".into()));
                self.push(Duration::ZERO, GattEvent::Connected);
                if self.device.notifies_unprompted {
                    self.start_notifications();
                }
            }
            GattCommand::Connect => {}
            GattCommand::CharReadUuid(_) => {
                if let Some(level) = self.device.battery {
                    self.push(
                        Duration::ZERO,
                        GattEvent::Value {
                            handle: Handle(0x0020),
                            bytes: vec![level],
                        },
                    );
                }
            }
            GattCommand::CharDesc => {
                for (handle, uuid) in self.device.descriptors.clone() {
                    self.push(Duration::ZERO, GattEvent::Descriptor { handle, uuid });
                }
            }
            GattCommand::CharWriteReq { .. } => {
                self.push(Duration::ZERO, GattEvent::WriteAck);
                self.start_notifications();
            }
            GattCommand::Quit => {}
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<GattEvent, ChannelError> {
        let Some((deadline, _)) = self.queue.front() else {
            if self.device.hang_up {
                return Err(ChannelError::Closed);
            }
            return std::future::pending().await;
        };
        tokio::time::sleep_until(*deadline).await;
        match self.queue.pop_front() {
            Some((_, event)) => Ok(event),
            None => Err(ChannelError::Closed),
        }
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

/// Hands out addresses in order, `None` entries never finish
pub struct ScriptedScanner {
    results: VecDeque<Option<BleAddress>>,
    log: SharedLog,
}

impl ScriptedScanner {
    pub fn new(results: impl IntoIterator<Item = Option<BleAddress>>, log: SharedLog) -> Self {
        Self {
            results: results.into_iter().collect(),
            log,
        }
    }
}

impl Scanner for ScriptedScanner {
    async fn scan(&mut self) -> Result<BleAddress, ScanError> {
        self.log.lock().unwrap().scans += 1;
        match self.results.pop_front() {
            Some(Some(address)) => Ok(address),
            Some(None) => std::future::pending().await,
            None => Err(ScanError::Ended),
        }
    }
}

/// Accepts inserts, fails every commit
pub struct FailingSink {
    log: SharedLog,
}

impl FailingSink {
    pub fn new(log: SharedLog) -> Self {
        Self { log }
    }
}

impl StorageSink for FailingSink {
    fn insert_reading(&mut self, _reading: &Reading) -> Result<(), StorageError> {
        Ok(())
    }

    fn insert_commit_metadata(&mut self, _metadata: &CommitMetadata) -> Result<(), StorageError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.log.lock().unwrap().commits += 1;
        Err(StorageError::Sqlite(rusqlite::Error::InvalidQuery))
    }
}
