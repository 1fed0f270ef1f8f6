//! The seam between the session state machine and a BLE stack.
//!
//! Requests are issued synchronously and return as soon as they are queued. Their outcome comes
//! back later as a [`TransportEvent`] delivered through the [`CallbackSink`] handed to
//! [`GattConnector::connect`]. Requests are issued while the session lock is held, so an
//! implementation must never call [`CallbackSink::deliver`] from inside a request method.

use std::sync::{PoisonError, Weak};
use log::debug;
use uuid::Uuid;

use crate::device::session::SessionSlot;
use crate::device::types::{DeviceHandle, Generation, TransportEvent};
use crate::error::DeviceError;

pub trait GattConnector {
    type Transport: GattTransport;

    /// Starts connecting to `handle`. The link state is reported through `callbacks` as a
    /// `ConnectionStateChanged` event.
    fn connect(&self, handle: &DeviceHandle, callbacks: CallbackSink<Self::Transport>) -> Result<Self::Transport, DeviceError>;
}

pub trait GattTransport: Send + 'static {
    /// Answered by `ServicesDiscovered`.
    fn discover_services(&mut self) -> Result<(), DeviceError>;

    /// Marks a characteristic for local notification delivery. Nothing is sent to the peripheral
    /// and no callback follows.
    fn set_notify(&mut self, service: Uuid, characteristic: Uuid, enabled: bool) -> Result<(), DeviceError>;

    /// Answered by `DescriptorWritten`.
    fn write_descriptor(&mut self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<(), DeviceError>;

    /// The value most recently notified for `characteristic`, if any.
    fn read_characteristic_value(&self, characteristic: Uuid) -> Option<Vec<u8>>;

    /// Releases the link. Consumes the transport so it can only happen once.
    fn close(self);
}

/// Routes transport callbacks into the session they were issued for.
///
/// Callbacks for a session that has been torn down or replaced are dropped.
pub struct CallbackSink<T: GattTransport> {
    generation: Generation,
    slot: Weak<SessionSlot<T>>,
}

impl<T: GattTransport> CallbackSink<T> {
    pub(crate) fn new(generation: Generation, slot: Weak<SessionSlot<T>>) -> Self {
        CallbackSink { generation, slot }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn deliver(&self, event: TransportEvent) {
        let slot = match self.slot.upgrade() {
            Some(slot) => slot,
            None => {
                debug!("Ignoring callback for generation {}, the owner is gone: {:?}", self.generation, event);
                return;
            },
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(session) if session.generation() == self.generation => {
                session.handle_transport_event(event);
            },
            _ => debug!("Ignoring stale callback for generation {}: {:?}", self.generation, event),
        }
    }
}

impl<T: GattTransport> Clone for CallbackSink<T> {
    fn clone(&self) -> Self {
        CallbackSink { generation: self.generation, slot: self.slot.clone() }
    }
}
