use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start (bluetooth): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to start session: {source}")]
    SessionError { #[from] source: SessionError },

    #[error("No micro:bit found; pass --device or move the device closer")]
    NoDevice,

    #[error("Failed to start (io): {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("The connection worker for this device has stopped")]
    WorkerStopped,

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {id} is not known to the adapter")]
    UnknownPeripheral { id: String },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Accelerometer payload too short: {len} bytes, expected at least 6")]
    TooShort { len: usize },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("No transport is available for this device")]
    TransportUnavailable,

    #[error("The session has already been started")]
    AlreadyStarted,

    #[error("A session is already active")]
    AlreadyActive,
}

/// Error taxonomy carried by [`crate::device::types::SessionEvent::TransportError`] and
/// recorded by [`crate::device::session::Session::error`] when a session stops.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("transport unavailable")]
    TransportUnavailable,

    #[error("accelerometer service unavailable")]
    ServiceUnavailable,

    #[error("enabling notifications failed")]
    NotifyFailed,

    #[error("malformed accelerometer payload")]
    MalformedPayload,

    #[error("unexpected disconnect")]
    UnexpectedDisconnect,

    #[error("transport request could not be issued")]
    RequestFailed,
}
