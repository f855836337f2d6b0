pub mod gatttool;
pub mod protocol;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::{AppError, ChannelError};
use protocol::{GattCommand, GattEvent};

/// A Bluetooth device address, `XX:XX:XX:XX:XX:XX`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress([u8; 6]);

impl BleAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for BleAddress {
    type Err = AppError;

    /// Accepts hex pairs separated by `:` or `-`, in either case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::InvalidAddress(s.to_owned());
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// A GATT attribute handle, written `0x0010` by gatttool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u16);

impl FromStr for Handle {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AppError::InvalidHandle(s.to_owned()))?;
        u16::from_str_radix(digits, 16)
            .map(Handle)
            .map_err(|_| AppError::InvalidHandle(s.to_owned()))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Text command/response session with a GATT control tool.
pub trait ControlChannel: Send {
    fn send(&mut self, command: GattCommand) -> impl Future<Output = Result<(), ChannelError>> + Send;
    /// Next parsed line of output. Must be cancel safe, it gets raced against timeouts.
    fn next_event(&mut self) -> impl Future<Output = Result<GattEvent, ChannelError>> + Send;
    /// Best effort, asks the tool to quit and reaps it.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens control channels to a device.
pub trait Connector: Send {
    type Channel: ControlChannel;

    fn open(
        &mut self,
        address: &BleAddress,
    ) -> impl Future<Output = Result<Self::Channel, ChannelError>> + Send;
}

#[derive(Debug)]
pub enum MatchError {
    Timeout,
    Channel(ChannelError),
}

/// Reads events until `matcher` accepts one or `wait` runs out.
///
/// Events the matcher rejects are dropped. The deadline is fixed up front,
/// unrelated chatter from the tool doesn't extend it.
pub async fn await_match<C, T, F>(
    channel: &mut C,
    wait: Duration,
    mut matcher: F,
) -> Result<T, MatchError>
where
    C: ControlChannel,
    F: FnMut(GattEvent) -> Option<T>,
{
    let deadline = Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, channel.next_event()).await {
            Err(_) => return Err(MatchError::Timeout),
            Ok(Err(e)) => return Err(MatchError::Channel(e)),
            Ok(Ok(event)) => {
                if let Some(matched) = matcher(event) {
                    return Ok(matched);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let address: BleAddress = "f4:ad:0a:12:b3:9c".parse().unwrap();
        assert_eq!(address, BleAddress::new([0xf4, 0xad, 0x0a, 0x12, 0xb3, 0x9c]));
        assert_eq!(address.to_string(), "F4:AD:0A:12:B3:9C");
    }

    #[test]
    fn address_with_dashes() {
        let address: BleAddress = "00-1A-7D-DA-71-13".parse().unwrap();
        assert_eq!(address.to_string(), "00:1A:7D:DA:71:13");
    }

    #[test]
    fn address_with_mixed_separators() {
        let address: BleAddress = "00:1a-7D:DA-71:13".parse().unwrap();
        assert_eq!(address.to_string(), "00:1A:7D:DA:71:13");
    }

    #[test]
    fn bad_addresses() {
        for bad in [
            "",
            "00:1A:7D:DA:71",
            "00:1A:7D:DA:71:13:55",
            "00:1A:7D:DA:71:13:",
            "00::1A:7D:DA:71:13",
            "0:1A:7D:DA:71:13",
            "00:1A:7D:DA:71:1G",
            "Polar H7",
        ] {
            assert!(bad.parse::<BleAddress>().is_err(), "{bad} parsed");
        }
    }

    #[test]
    fn handles() {
        assert_eq!("0x0010".parse::<Handle>().unwrap(), Handle(0x10));
        assert_eq!("0x002a".parse::<Handle>().unwrap().to_string(), "0x002a");
        assert!("0010".parse::<Handle>().is_err());
        assert!("0xzz".parse::<Handle>().is_err());
    }
}
