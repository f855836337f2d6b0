use std::path::PathBuf;

use thiserror::Error;

/// Represents all possible errors that can end a logging session
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Couldn't find gatttool at \"{0}\"")]
    GatttoolMissing(PathBuf),
    #[error("Invalid BLE address: \"{0}\"")]
    InvalidAddress(String),
    #[error("Invalid GATT handle: \"{0}\"")]
    InvalidHandle(String),
    #[error("Failed to create file \"{path}\": {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to set up logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Control channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    // Session-ending
    #[error("Couldn't find the heart rate measurement handle on {address}")]
    HandleNotFound { address: String },
}

/// A notification payload that doesn't fit the layout its own flags describe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(&'static str),
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to spawn \"{program}\": {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Control channel closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to spawn \"{program}\": {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Scan ended without finding a device")]
    Ended,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create directory \"{path}\": {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
