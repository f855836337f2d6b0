use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::protocol::{parse_line, GattCommand, GattEvent};
use super::{BleAddress, Connector, ControlChannel};
use crate::errors::ChannelError;

const QUIT_GRACE: Duration = Duration::from_secs(2);

/// Tracing target of the raw lines exchanged with gatttool
pub const GATTTOOL_TARGET: &str = "gatttool";

/// Spawns one interactive gatttool per connection attempt
pub struct GatttoolConnector {
    program: PathBuf,
    debug_output: bool,
}

impl GatttoolConnector {
    pub fn new(program: PathBuf, debug_output: bool) -> Self {
        Self {
            program,
            debug_output,
        }
    }
}

impl Connector for GatttoolConnector {
    type Channel = GatttoolChannel;

    async fn open(&mut self, address: &BleAddress) -> Result<GatttoolChannel, ChannelError> {
        let mut child = Command::new(&self.program)
            .arg("-b")
            .arg(address.to_string())
            .args(["-t", "random", "--interactive"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // Dropping a channel mid-handshake must not leave gatttool holding the adapter
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(ChannelError::Closed)?;
        let stdout = child.stdout.take().ok_or(ChannelError::Closed)?;
        debug!("Spawned {} for {address}", self.program.display());
        Ok(GatttoolChannel {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            debug_output: self.debug_output,
        })
    }
}

pub struct GatttoolChannel {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    debug_output: bool,
}

impl ControlChannel for GatttoolChannel {
    async fn send(&mut self, command: GattCommand) -> Result<(), ChannelError> {
        let line = format!("{command}\n");
        if self.debug_output {
            debug!(target: GATTTOOL_TARGET, "> {}", line.trim_end());
        }
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<GattEvent, ChannelError> {
        match self.lines.next_line().await? {
            Some(line) => {
                if self.debug_output {
                    debug!(target: GATTTOOL_TARGET, "< {line}");
                }
                Ok(parse_line(&line))
            }
            None => Err(ChannelError::Closed),
        }
    }

    async fn close(&mut self) {
        // Fails if gatttool is already gone, which is fine
        let _ = self.send(GattCommand::Quit).await;
        match tokio::time::timeout(QUIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("gatttool exited with {status}"),
            Ok(Err(e)) => warn!("Failed to wait on gatttool: {e}"),
            Err(_) => {
                warn!("gatttool didn't quit, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill gatttool: {e}");
                }
            }
        }
    }
}
