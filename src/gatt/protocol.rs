//! gatttool's interactive mode, as typed commands and parsed response lines.

use std::fmt;

use uuid::Uuid;

use super::Handle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCommand {
    Connect,
    CharReadUuid(Uuid),
    CharDesc,
    CharWriteReq { handle: Handle, value: Vec<u8> },
    Quit,
}

impl fmt::Display for GattCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattCommand::Connect => write!(f, "connect"),
            GattCommand::CharReadUuid(uuid) => write!(f, "char-read-uuid {uuid}"),
            GattCommand::CharDesc => write!(f, "char-desc"),
            GattCommand::CharWriteReq { handle, value } => {
                write!(f, "char-write-req {handle} ")?;
                for byte in value {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            GattCommand::Quit => write!(f, "quit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// "Connection successful"
    Connected,
    /// A bare prompt, `[CON]` marks an established connection
    Prompt { connected: bool },
    /// A `char-desc` line
    Descriptor { handle: Handle, uuid: Uuid },
    /// A `char-read-*` response
    Value { handle: Handle, bytes: Vec<u8> },
    /// A notification or indication
    Notification { handle: Handle, bytes: Vec<u8> },
    WriteAck,
    Error(String),
    Other(String),
}

const PROMPT_END: &str = "[LE]>";
const CONNECTED_MARKER: &str = "[CON]";

/// Turns one line of gatttool output into an event.
///
/// Escape codes and any readline prompt echoed in front of the text are dropped first.
/// Lines that look like a known response but don't parse come back as `Other`.
pub fn parse_line(raw: &str) -> GattEvent {
    // Readline redraws with carriage returns, only the last redraw counts
    let last_redraw = raw.rsplit('\r').find(|s| !s.trim().is_empty()).unwrap_or("");
    let cleaned = strip_ansi_escapes::strip_str(last_redraw);

    let (prompt_connected, text) = match cleaned.rfind(PROMPT_END) {
        Some(pos) => (
            Some(cleaned[..pos].contains(CONNECTED_MARKER)),
            cleaned[pos + PROMPT_END.len()..].trim(),
        ),
        None => (None, cleaned.trim()),
    };

    if text.is_empty() {
        return match prompt_connected {
            Some(connected) => GattEvent::Prompt { connected },
            None => GattEvent::Other(String::new()),
        };
    }

    parse_response(text).unwrap_or_else(|| GattEvent::Other(text.to_owned()))
}

fn parse_response(text: &str) -> Option<GattEvent> {
    if text.starts_with("Connection successful") {
        return Some(GattEvent::Connected);
    }
    if text.starts_with("Characteristic value was written successfully") {
        return Some(GattEvent::WriteAck);
    }
    if let Some(message) = text.strip_prefix("Error:") {
        return Some(GattEvent::Error(message.trim().to_owned()));
    }

    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.as_slice() {
        // Notification handle = 0x0010 value: 16 4b 24 03
        ["Notification" | "Indication", "handle", "=", handle, "value:", bytes @ ..] => {
            Some(GattEvent::Notification {
                handle: handle.parse().ok()?,
                bytes: parse_hex_bytes(bytes)?,
            })
        }
        // handle: 0x0011, uuid: 00002902-0000-1000-8000-00805f9b34fb
        ["handle:", handle, "uuid:", uuid] => Some(GattEvent::Descriptor {
            handle: handle.parse().ok()?,
            uuid: Uuid::parse_str(uuid).ok()?,
        }),
        // handle: 0x0031 	 value: 5a
        ["handle:", handle, "value:", bytes @ ..] => Some(GattEvent::Value {
            handle: handle.parse().ok()?,
            bytes: parse_hex_bytes(bytes)?,
        }),
        _ => None,
    }
}

/// `["16", "4b"]` -> `[0x16, 0x4b]`, None on anything that isn't a hex pair
fn parse_hex_bytes(tokens: &[&str]) -> Option<Vec<u8>> {
    tokens
        .iter()
        .map(|t| {
            if t.len() == 2 {
                u8::from_str_radix(t, 16).ok()
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heart_rate::{
        BATTERY_LEVEL_CHARACTERISTIC_UUID, CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
    };

    #[test]
    fn commands_render_as_gatttool_expects() {
        assert_eq!(GattCommand::Connect.to_string(), "connect");
        assert_eq!(GattCommand::CharDesc.to_string(), "char-desc");
        assert_eq!(GattCommand::Quit.to_string(), "quit");
        assert_eq!(
            GattCommand::CharReadUuid(BATTERY_LEVEL_CHARACTERISTIC_UUID).to_string(),
            "char-read-uuid 00002a19-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            GattCommand::CharWriteReq {
                handle: Handle(0x11),
                value: vec![0x01, 0x00]
            }
            .to_string(),
            "char-write-req 0x0011 0100"
        );
    }

    #[test]
    fn notification() {
        assert_eq!(
            parse_line("Notification handle = 0x0010 value: 16 4b 24 03 "),
            GattEvent::Notification {
                handle: Handle(0x10),
                bytes: vec![0x16, 0x4b, 0x24, 0x03]
            }
        );
    }

    #[test]
    fn notification_behind_prompt() {
        let line = "\x1b[0m[CON][F4:AD:0A:12:B3:9C][LE]> Notification handle = 0x0010 value: 10 3c 00 02";
        assert_eq!(
            parse_line(line),
            GattEvent::Notification {
                handle: Handle(0x10),
                bytes: vec![0x10, 0x3c, 0x00, 0x02]
            }
        );
    }

    #[test]
    fn descriptor() {
        assert_eq!(
            parse_line("handle: 0x0011, uuid: 00002902-0000-1000-8000-00805f9b34fb"),
            GattEvent::Descriptor {
                handle: Handle(0x11),
                uuid: CLIENT_CHARACTERISTIC_CONFIGURATION_UUID
            }
        );
    }

    #[test]
    fn read_value() {
        assert_eq!(
            parse_line("handle: 0x0031 \t value: 5a "),
            GattEvent::Value {
                handle: Handle(0x31),
                bytes: vec![0x5a]
            }
        );
    }

    #[test]
    fn connection_markers() {
        assert_eq!(parse_line("Connection successful"), GattEvent::Connected);
        assert_eq!(
            parse_line("[CON][F4:AD:0A:12:B3:9C][LE]>"),
            GattEvent::Prompt { connected: true }
        );
        assert_eq!(
            parse_line("[   ][F4:AD:0A:12:B3:9C][LE]> "),
            GattEvent::Prompt { connected: false }
        );
        assert_eq!(
            parse_line("Attempting to connect to F4:AD:0A:12:B3:9C\rConnection successful"),
            GattEvent::Connected
        );
    }

    #[test]
    fn errors_and_acks() {
        assert_eq!(
            parse_line("Error: connect error: Connection refused (111)"),
            GattEvent::Error("connect error: Connection refused (111)".into())
        );
        assert_eq!(
            parse_line("Characteristic value was written successfully"),
            GattEvent::WriteAck
        );
    }

    #[test]
    fn garbled_lines_are_other() {
        assert_eq!(
            parse_line("Notification handle = 0x0010 value: 1 4b"),
            GattEvent::Other("Notification handle = 0x0010 value: 1 4b".into())
        );
        assert_eq!(
            parse_line("handle: 0x0011, uuid: not-a-uuid"),
            GattEvent::Other("handle: 0x0011, uuid: not-a-uuid".into())
        );
        assert_eq!(
            parse_line("Attempting to connect to F4:AD:0A:12:B3:9C"),
            GattEvent::Other("Attempting to connect to F4:AD:0A:12:B3:9C".into())
        );
    }
}
