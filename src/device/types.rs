use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{make_accelerometer_data_uuid, make_accelerometer_service_uuid, make_client_characteristic_config_uuid};
use crate::error::ErrorKind;

/// Identifies the remote peripheral to connect to.
///
/// `id` is whatever the platform uses to address a peripheral: the MAC address on Linux and
/// Windows, a CoreBluetooth UUID on macOS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceHandle { id: id.into(), name: None }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        DeviceHandle { id: id.into(), name: Some(name.into()) }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// The service, characteristic and descriptor a session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorProfile {
    pub service: Uuid,
    pub data_characteristic: Uuid,
    pub notify_descriptor: Uuid,
}

impl Default for SensorProfile {
    fn default() -> Self {
        SensorProfile {
            service: make_accelerometer_service_uuid(),
            data_characteristic: make_accelerometer_data_uuid(),
            notify_descriptor: make_client_characteristic_config_uuid(),
        }
    }
}

/// One accelerometer sample, in g.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( {:.2}, {:.2}, {:.2} )", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ServiceUnavailable,
    NotifyFailed,
    RequestFailed,
}

impl From<FailureReason> for ErrorKind {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::ServiceUnavailable => ErrorKind::ServiceUnavailable,
            FailureReason::NotifyFailed => ErrorKind::NotifyFailed,
            FailureReason::RequestFailed => ErrorKind::RequestFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    ServicesDiscovered,
    NotifyEnabling,
    Streaming,
    Disconnected,
    Failed(FailureReason),
}

impl SessionState {
    /// The states in which the session owns a connected transport.
    pub fn holds_transport(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::ServicesDiscovered
                | SessionState::NotifyEnabling
                | SessionState::Streaming
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed(_))
    }
}

/// What the session reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    ServiceUnavailable,
    NotificationsEnabled(bool),
    Reading(Reading),
    TransportError(ErrorKind),
}

impl SessionEvent {
    /// Short text suitable for a status line.
    pub fn status_text(&self) -> String {
        match self {
            SessionEvent::Connected => "Connected".to_string(),
            SessionEvent::Disconnected => "Disconnected".to_string(),
            SessionEvent::ServiceUnavailable => "Acc-data characteristic not found".to_string(),
            SessionEvent::NotificationsEnabled(true) => "Acc-data notifications enabled".to_string(),
            SessionEvent::NotificationsEnabled(false) => "Failed to enable acc-data notifications".to_string(),
            SessionEvent::Reading(reading) => reading.to_string(),
            SessionEvent::TransportError(kind) => format!("Error: {}", kind),
        }
    }

    /// True for events after which the session delivers nothing more.
    pub fn ends_session(&self) -> bool {
        match self {
            SessionEvent::Disconnected
            | SessionEvent::ServiceUnavailable
            | SessionEvent::NotificationsEnabled(false) => true,
            SessionEvent::TransportError(kind) => *kind == ErrorKind::RequestFailed,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(u8),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        *self == GattStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// Callbacks from the transport, in the order the transport produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged { status: GattStatus, state: LinkState },
    ServicesDiscovered { status: GattStatus, services: Vec<DiscoveredService> },
    DescriptorWritten { descriptor: Uuid, status: GattStatus },
    CharacteristicChanged { characteristic: Uuid, value: Vec<u8> },
    CharacteristicRead { characteristic: Uuid, status: GattStatus },
    CharacteristicWritten { characteristic: Uuid, status: GattStatus },
}

pub type Generation = u64;
