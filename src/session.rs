//! Connection lifecycle for one heart rate monitor.
//!
//! ```text
//! Discovering -> Connecting -> Negotiating -> Streaming
//!                    ^                            | no data
//!                    +------- Reconnecting <------+
//! ```
//!
//! Any state goes to `ShuttingDown` once the cancel token fires. Connectivity
//! problems are retried forever, only structural ones (no heart rate handle,
//! storage failures, missing tools) end the session.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, ChannelError, ScanError};
use crate::gatt::protocol::{GattCommand, GattEvent};
use crate::gatt::{await_match, BleAddress, Connector, ControlChannel, Handle, MatchError};
use crate::heart_rate::measurement::decode;
use crate::heart_rate::period::PeriodEstimator;
use crate::heart_rate::{
    BATTERY_LEVEL_CHARACTERISTIC_UUID, CHARACTERISTIC_DECLARATION_UUID,
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, ENABLE_NOTIFICATIONS,
    HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID, PRIMARY_SERVICE_UUID,
};
use crate::scan::Scanner;
use crate::storage::scheduler::CommitScheduler;
use crate::storage::StorageSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Discovering,
    Connecting,
    Negotiating,
    Streaming,
    Reconnecting,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub scan: Duration,
    pub scan_backoff: Duration,
    pub connect: Duration,
    pub battery: Duration,
    pub descriptors: Duration,
    /// Connection is considered lost after this long without a notification
    pub notification: Duration,
    pub reconnect_pause: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            scan: Duration::from_secs(20),
            scan_backoff: Duration::from_secs(20),
            connect: Duration::from_secs(30),
            battery: Duration::from_secs(10),
            descriptors: Duration::from_secs(10),
            notification: Duration::from_secs(10),
            reconnect_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// None starts with a scan
    pub address: Option<BleAddress>,
    /// Skips descriptor discovery, no CCC write is done either
    pub hr_handle: Option<Handle>,
    pub check_battery: bool,
    /// Scan again after a lost connection, if the address came from a scan
    pub rediscover_on_reconnect: bool,
    pub timeouts: SessionTimeouts,
}

/// Handles of the Heart Rate Measurement value and its CCC descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrmHandles {
    pub measurement: Handle,
    pub control: Option<Handle>,
}

/// Walks `char-desc` output looking for the measurement value and the CCC that belongs to it.
#[derive(Debug, Default)]
pub struct DescriptorSearch {
    measurement: Option<Handle>,
}

impl DescriptorSearch {
    /// Returns the handles as soon as they're known.
    ///
    /// A declaration after the measurement value means its descriptors are over,
    /// so a characteristic without a CCC is reported with `control: None`.
    pub fn observe(&mut self, handle: Handle, uuid: Uuid) -> Option<HrmHandles> {
        let Some(measurement) = self.measurement else {
            if uuid == HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID {
                self.measurement = Some(handle);
            }
            return None;
        };
        if uuid == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID {
            Some(HrmHandles {
                measurement,
                control: Some(handle),
            })
        } else if uuid == CHARACTERISTIC_DECLARATION_UUID || uuid == PRIMARY_SERVICE_UUID {
            Some(HrmHandles {
                measurement,
                control: None,
            })
        } else {
            None
        }
    }

    /// What was found by the time the listing stopped
    pub fn finish(self) -> Option<HrmHandles> {
        self.measurement.map(|measurement| HrmHandles {
            measurement,
            control: None,
        })
    }
}

pub struct Session<C: Connector, S: Scanner, K: StorageSink> {
    connector: C,
    scanner: S,
    scheduler: Option<CommitScheduler<K>>,
    cancel_token: CancellationToken,
    timeouts: SessionTimeouts,
    check_battery: bool,
    rediscover_on_reconnect: bool,
    preset_handle: Option<Handle>,

    address: Option<BleAddress>,
    address_discovered: bool,
    handles: Option<HrmHandles>,
    period: PeriodEstimator,
    channel: Option<C::Channel>,
    state: SessionState,
}

impl<C: Connector, S: Scanner, K: StorageSink> Session<C, S, K> {
    /// Without a scheduler, readings are only logged.
    pub fn new(
        options: SessionOptions,
        connector: C,
        scanner: S,
        scheduler: Option<CommitScheduler<K>>,
        cancel_token: CancellationToken,
    ) -> Self {
        let state = if options.address.is_some() {
            SessionState::Connecting
        } else {
            SessionState::Discovering
        };
        Self {
            connector,
            scanner,
            scheduler,
            cancel_token,
            timeouts: options.timeouts,
            check_battery: options.check_battery,
            rediscover_on_reconnect: options.rediscover_on_reconnect,
            preset_handle: options.hr_handle,
            address: options.address,
            address_discovered: false,
            handles: preset_handles(options.hr_handle),
            period: PeriodEstimator::new(),
            channel: None,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> Option<BleAddress> {
        self.address
    }

    pub fn handles(&self) -> Option<HrmHandles> {
        self.handles
    }

    /// Current notification period estimate in seconds
    pub fn period(&self) -> f64 {
        self.period.period()
    }

    pub fn scheduler(&self) -> Option<&CommitScheduler<K>> {
        self.scheduler.as_ref()
    }

    /// Drives the session until it's cancelled or fails, then flushes and disconnects.
    pub async fn run(&mut self) -> Result<(), AppError> {
        let mut result = Ok(());
        while self.state != SessionState::ShuttingDown {
            if let Err(e) = self.advance().await {
                result = Err(e);
                break;
            }
        }
        let shutdown = self.shutdown().await;
        result.and(shutdown)
    }

    /// Runs the current state's step once and moves to the state it leads to.
    ///
    /// Errors are fatal: the session is left in `ShuttingDown`.
    pub async fn advance(&mut self) -> Result<SessionState, AppError> {
        let step = match self.state {
            SessionState::Discovering => self.discover().await,
            SessionState::Connecting => self.connect().await,
            SessionState::Negotiating => self.negotiate().await,
            SessionState::Streaming => self.stream().await,
            SessionState::Reconnecting => self.reconnect().await,
            SessionState::ShuttingDown => Ok(SessionState::ShuttingDown),
        };
        match step {
            Ok(next) => {
                if next != self.state {
                    debug!("Session {:?} -> {:?}", self.state, next);
                }
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                error!(
                    "Session failed while {:?} ({}): {e}",
                    self.state,
                    self.address_label()
                );
                self.state = SessionState::ShuttingDown;
                Err(e)
            }
        }
    }

    async fn discover(&mut self) -> Result<SessionState, AppError> {
        info!("Trying to find a BLE device");
        let token = self.cancel_token.clone();
        let scan = tokio::time::timeout(self.timeouts.scan, self.scanner.scan());
        match cancellable(&token, scan).await {
            None => {
                info!("Cancelled while scanning");
                Ok(SessionState::ShuttingDown)
            }
            Some(Ok(Ok(address))) => {
                info!("Found BLE device {address}");
                self.address = Some(address);
                self.address_discovered = true;
                Ok(pause_then(
                    &self.cancel_token,
                    self.scanner.settle_time(),
                    SessionState::Connecting,
                )
                .await)
            }
            Some(Ok(Err(e @ ScanError::Spawn { .. }))) => Err(e.into()),
            Some(outcome) => {
                match outcome {
                    Ok(Err(e)) => warn!("Scan failed: {e}"),
                    _ => info!("No device found"),
                }
                debug!("Scanning again in {:?}", self.timeouts.scan_backoff);
                Ok(pause_then(
                    &self.cancel_token,
                    self.timeouts.scan_backoff,
                    SessionState::Discovering,
                )
                .await)
            }
        }
    }

    async fn connect(&mut self) -> Result<SessionState, AppError> {
        let Some(address) = self.address else {
            return Ok(SessionState::Discovering);
        };
        info!("Establishing connection to {address}");
        let token = self.cancel_token.clone();

        let mut channel = match cancellable(&token, self.connector.open(&address)).await {
            None => return Ok(SessionState::ShuttingDown),
            Some(Ok(channel)) => channel,
            Some(Err(e @ ChannelError::Spawn { .. })) => return Err(e.into()),
            Some(Err(e)) => {
                warn!("Couldn't open control channel to {address}: {e}");
                return Ok(pause_then(
                    &self.cancel_token,
                    self.timeouts.reconnect_pause,
                    SessionState::Connecting,
                )
                .await);
            }
        };

        let connect_timeout = self.timeouts.connect;
        let handshake = async {
            channel
                .send(GattCommand::Connect)
                .await
                .map_err(MatchError::Channel)?;
            await_match(&mut channel, connect_timeout, |event| match event {
                GattEvent::Connected | GattEvent::Prompt { connected: true } => Some(()),
                GattEvent::Error(message) => {
                    debug!("Connect attempt reported: {message}");
                    None
                }
                _ => None,
            })
            .await
        };

        match cancellable(&token, handshake).await {
            None => {
                channel.close().await;
                Ok(SessionState::ShuttingDown)
            }
            Some(Ok(())) => {
                info!("Connected to {address}");
                self.channel = Some(channel);
                Ok(SessionState::Negotiating)
            }
            Some(Err(MatchError::Timeout)) => {
                info!("Connection timeout. Retrying.");
                channel.close().await;
                Ok(SessionState::Connecting)
            }
            Some(Err(MatchError::Channel(e))) => {
                warn!("Control channel to {address} failed while connecting: {e}");
                channel.close().await;
                Ok(pause_then(
                    &self.cancel_token,
                    self.timeouts.reconnect_pause,
                    SessionState::Connecting,
                )
                .await)
            }
        }
    }

    async fn negotiate(&mut self) -> Result<SessionState, AppError> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(SessionState::Connecting);
        };
        let token = self.cancel_token.clone();

        match cancellable(&token, self.negotiate_on(&mut channel)).await {
            None => {
                // Closed by shutdown
                self.channel = Some(channel);
                Ok(SessionState::ShuttingDown)
            }
            Some(Ok(Some(handles))) => {
                info!(
                    "Streaming heart rate from {} (handle {})",
                    self.address_label(),
                    handles.measurement
                );
                self.period = PeriodEstimator::new();
                self.channel = Some(channel);
                Ok(SessionState::Streaming)
            }
            Some(Ok(None)) => {
                channel.close().await;
                Err(AppError::HandleNotFound {
                    address: self.address_label(),
                })
            }
            Some(Err(e)) => {
                warn!(
                    "Control channel to {} failed while negotiating: {e}",
                    self.address_label()
                );
                channel.close().await;
                Ok(SessionState::Reconnecting)
            }
        }
    }

    /// Battery (optional), handle discovery, then enabling notifications.
    /// `Ok(None)` means the device has no heart rate measurement characteristic.
    async fn negotiate_on(
        &mut self,
        channel: &mut C::Channel,
    ) -> Result<Option<HrmHandles>, ChannelError> {
        if self.check_battery {
            read_battery(channel, self.timeouts.battery).await?;
        }

        let handles = match self.handles {
            Some(handles) => handles,
            None => match discover_handles(channel, self.timeouts.descriptors).await? {
                Some(handles) => handles,
                None => return Ok(None),
            },
        };
        self.handles = Some(handles);

        match handles.control {
            Some(control) => {
                channel
                    .send(GattCommand::CharWriteReq {
                        handle: control,
                        value: ENABLE_NOTIFICATIONS.to_vec(),
                    })
                    .await?;
            }
            None if self.preset_handle.is_none() => {
                warn!("No notification descriptor found, waiting for notifications anyway")
            }
            None => {}
        }
        Ok(Some(handles))
    }

    async fn stream(&mut self) -> Result<SessionState, AppError> {
        let (Some(handles), Some(channel)) = (self.handles, self.channel.as_mut()) else {
            return Ok(SessionState::Reconnecting);
        };
        let token = self.cancel_token.clone();
        let measurement = handles.measurement;

        let received = cancellable(
            &token,
            await_match(channel, self.timeouts.notification, |event| match event {
                GattEvent::Notification { handle, bytes } if handle == measurement => Some(bytes),
                _ => None,
            }),
        )
        .await;

        match received {
            None => Ok(SessionState::ShuttingDown),
            Some(Ok(bytes)) => {
                self.handle_notification(&bytes)?;
                Ok(SessionState::Streaming)
            }
            Some(Err(e)) => {
                match e {
                    MatchError::Timeout => warn!(
                        "Connection lost with {}. Reconnecting.",
                        self.address_label()
                    ),
                    MatchError::Channel(e) => warn!(
                        "Control channel to {} failed: {e}. Reconnecting.",
                        self.address_label()
                    ),
                }
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.flush()?;
                }
                self.close_channel().await;
                Ok(SessionState::Reconnecting)
            }
        }
    }

    fn handle_notification(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        let received_at = Instant::now();
        let reading = match decode(bytes) {
            Ok(reading) => reading.with_timestamp(chrono::Utc::now().timestamp()),
            Err(e) => {
                warn!("Skipping notification from {}: {e}", self.address_label());
                return Ok(());
            }
        };
        let period = self.period.update(received_at);
        debug!("{reading:?}, period {period:.3}s");

        match self.scheduler.as_mut() {
            Some(scheduler) => {
                scheduler.record(&reading, period)?;
            }
            None => info!("Heart rate: {}", reading.heart_rate),
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<SessionState, AppError> {
        let next = if self.rediscover_on_reconnect && self.address_discovered {
            SessionState::Discovering
        } else {
            SessionState::Connecting
        };
        let next = pause_then(&self.cancel_token, self.timeouts.reconnect_pause, next).await;
        if next == SessionState::Discovering {
            info!("Forgetting {} and scanning again", self.address_label());
            self.address = None;
            self.address_discovered = false;
            self.handles = preset_handles(self.preset_handle);
        }
        Ok(next)
    }

    async fn shutdown(&mut self) -> Result<(), AppError> {
        info!("Shutting down session");
        let flushed = match self.scheduler.take() {
            Some(scheduler) => scheduler.finish().map(|_| ()),
            None => Ok(()),
        };
        if let Err(e) = &flushed {
            error!("Failed to flush readings: {e}");
        }
        self.close_channel().await;
        flushed.map_err(AppError::from)
    }

    async fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }

    fn address_label(&self) -> String {
        self.address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown device".into())
    }
}

fn preset_handles(hr_handle: Option<Handle>) -> Option<HrmHandles> {
    hr_handle.map(|measurement| HrmHandles {
        measurement,
        control: None,
    })
}

/// Sleeps, then goes to `next`. Cancellation cuts it short to `ShuttingDown`.
async fn pause_then(token: &CancellationToken, duration: Duration, next: SessionState) -> SessionState {
    match cancellable(token, tokio::time::sleep(duration)).await {
        Some(()) => next,
        None => SessionState::ShuttingDown,
    }
}

/// None if the token fired first
async fn cancellable<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = future => Some(output),
    }
}

async fn read_battery<Ch: ControlChannel>(channel: &mut Ch, wait: Duration) -> Result<(), ChannelError> {
    channel
        .send(GattCommand::CharReadUuid(BATTERY_LEVEL_CHARACTERISTIC_UUID))
        .await?;
    let level = await_match(channel, wait, |event| match event {
        GattEvent::Value { bytes, .. } => bytes.first().copied(),
        _ => None,
    })
    .await;
    match level {
        Ok(level) => info!("Battery level: {level}"),
        Err(MatchError::Timeout) => error!("Couldn't read battery level."),
        Err(MatchError::Channel(e)) => return Err(e),
    }
    Ok(())
}

async fn discover_handles<Ch: ControlChannel>(
    channel: &mut Ch,
    wait: Duration,
) -> Result<Option<HrmHandles>, ChannelError> {
    channel.send(GattCommand::CharDesc).await?;
    let mut search = DescriptorSearch::default();
    let found = await_match(channel, wait, |event| match event {
        GattEvent::Descriptor { handle, uuid } => search.observe(handle, uuid),
        _ => None,
    })
    .await;
    match found {
        Ok(handles) => Ok(Some(handles)),
        Err(MatchError::Timeout) => Ok(search.finish()),
        Err(MatchError::Channel(e)) => Err(e),
    }
}
