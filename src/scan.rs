use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ScanError;
use crate::gatt::BleAddress;

/// Time given to the adapter to settle after `lescan` is stopped
const SCAN_SETTLE: Duration = Duration::from_secs(1);

/// Finds a device to connect to.
///
/// Scans aren't bounded here, the session races them against its scan timeout.
pub trait Scanner: Send {
    fn scan(&mut self) -> impl Future<Output = Result<BleAddress, ScanError>> + Send;

    /// How long to leave the adapter alone after a successful scan, outside the scan timeout
    fn settle_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// Runs `hcitool lescan` and takes the first address it prints
pub struct HcitoolScanner {
    program: PathBuf,
}

impl HcitoolScanner {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl Scanner for HcitoolScanner {
    async fn scan(&mut self) -> Result<BleAddress, ScanError> {
        let mut child = Command::new(&self.program)
            .arg("lescan")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScanError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or(ScanError::Ended)?;
        let mut lines = BufReader::new(stdout).lines();

        let address = loop {
            let Some(line) = lines.next_line().await? else {
                return Err(ScanError::Ended);
            };
            debug!(target: "hcitool", "{line}");
            if let Some(address) = find_address(&line) {
                break address;
            }
        };

        if let Err(e) = child.kill().await {
            warn!("Failed to stop lescan: {e}");
        }
        Ok(address)
    }

    fn settle_time(&self) -> Duration {
        SCAN_SETTLE
    }
}

/// First whitespace separated token of `line` that is a BLE address
pub fn find_address(line: &str) -> Option<BleAddress> {
    line.split_whitespace().find_map(|token| token.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lescan_device_line() {
        assert_eq!(
            find_address("F4:AD:0A:12:B3:9C Polar H7 3A1B2C"),
            Some(BleAddress::new([0xf4, 0xad, 0x0a, 0x12, 0xb3, 0x9c]))
        );
        assert_eq!(
            find_address("E0:01:02:03:04:05 (unknown)"),
            Some(BleAddress::new([0xe0, 0x01, 0x02, 0x03, 0x04, 0x05]))
        );
    }

    #[test]
    fn lescan_header_has_no_address() {
        assert_eq!(find_address("LE Scan ..."), None);
        assert_eq!(find_address(""), None);
    }

    #[test]
    fn first_address_wins() {
        assert_eq!(
            find_address("00-11-22-33-44-55 AA:BB:CC:DD:EE:FF"),
            Some(BleAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
        );
    }
}
