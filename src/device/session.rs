//! The GATT session state machine.
//!
//! A [`Session`] walks one connection through
//! `Idle -> Connecting -> Connected -> ServicesDiscovered -> NotifyEnabling -> Streaming`.
//! Every transition is driven by a [`TransportEvent`] passed to
//! [`Session::handle_transport_event`], or by [`Session::connect`] and [`Session::disconnect`].
//! `Disconnected` and `Failed` are terminal; a new connection needs a new session.
//!
//! Known limitation: when a notification arrives the session ignores which characteristic it
//! was for and what it carried, and decodes the cached value of the accelerometer data
//! characteristic instead. That is fine while it is the only subscribed characteristic and
//! would be wrong with more than one.

use std::sync::Mutex;
use log::{debug, info, warn};

use crate::device::codec::decode;
use crate::device::constants::ENABLE_NOTIFICATION_VALUE;
use crate::device::dispatcher::EventDispatcher;
use crate::device::transport::{CallbackSink, GattConnector, GattTransport};
use crate::device::types::{DeviceHandle, DiscoveredService, FailureReason, Generation, GattStatus, LinkState, SensorProfile, SessionEvent, SessionState, TransportEvent};
use crate::error::{DeviceError, ErrorKind, SessionError};

/// Where a lifecycle owner keeps its current session. Callbacks lock it to run a transition.
pub type SessionSlot<T> = Mutex<Option<Session<T>>>;

pub struct Session<T: GattTransport> {
    state: SessionState,
    // the link while the connection attempt is outstanding
    pending: Option<T>,
    transport: Option<T>,
    // why the session stopped, or never started
    error: Option<ErrorKind>,
    profile: SensorProfile,
    generation: Generation,
    dispatcher: EventDispatcher,
}

impl<T: GattTransport> Session<T> {
    pub fn new(profile: SensorProfile, generation: Generation, dispatcher: EventDispatcher) -> Self {
        Session {
            state: SessionState::Idle,
            pending: None,
            transport: None,
            error: None,
            profile,
            generation,
            dispatcher,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The failure that stopped this session, or kept it from starting. Malformed payloads do
    /// not stop a session and are not recorded here. A disconnect asked for by the consumer is
    /// not a failure.
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// True while a connection attempt is in flight or established.
    pub fn is_live(&self) -> bool {
        self.state != SessionState::Idle && !self.state.is_terminal()
    }

    pub fn connect<C>(&mut self, handle: Option<&DeviceHandle>, connector: &C, callbacks: CallbackSink<T>) -> Result<(), SessionError>
    where
        C: GattConnector<Transport = T>,
    {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        let handle = match handle {
            Some(handle) => handle,
            None => {
                debug!("No device handle available, staying idle");
                self.error = Some(ErrorKind::TransportUnavailable);
                return Err(SessionError::TransportUnavailable);
            },
        };

        info!("Connecting to {}...", handle);
        match connector.connect(handle, callbacks) {
            Ok(link) => {
                self.pending = Some(link);
                self.state = SessionState::Connecting;
                self.error = None;
                Ok(())
            },
            Err(err) => {
                warn!("Could not start connecting to {}: {}", handle, err);
                self.error = Some(ErrorKind::TransportUnavailable);
                Err(SessionError::TransportUnavailable)
            },
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.state == SessionState::Idle || self.state.is_terminal() {
            debug!("Ignoring {:?} in state {:?}", event, self.state);
            return;
        }

        // a lost link wins over anything else
        if let TransportEvent::ConnectionStateChanged { status, state: LinkState::Disconnected } = &event {
            let kind = ErrorKind::UnexpectedDisconnect;
            warn!("{} in state {:?} (status {:?})", kind, self.state, status);
            self.release();
            self.state = SessionState::Disconnected;
            self.error = Some(kind);
            self.dispatcher.publish(SessionEvent::Disconnected);
            return;
        }

        match (self.state, event) {
            (SessionState::Connecting, TransportEvent::ConnectionStateChanged { state: LinkState::Connected, .. }) => {
                self.on_connected();
            },
            (SessionState::Connected, TransportEvent::ServicesDiscovered { status, services }) => {
                self.on_services_discovered(status, &services);
            },
            (SessionState::NotifyEnabling, TransportEvent::DescriptorWritten { descriptor, status }) => {
                if descriptor != self.profile.notify_descriptor {
                    debug!("Ignoring write of unrelated descriptor {}", descriptor);
                } else if status.is_success() {
                    info!("Notifications enabled for {}", self.profile.data_characteristic);
                    self.state = SessionState::Streaming;
                    self.dispatcher.publish(SessionEvent::NotificationsEnabled(true));
                } else {
                    warn!("Writing {} failed with status {:?}", descriptor, status);
                    self.fail(FailureReason::NotifyFailed, SessionEvent::NotificationsEnabled(false));
                }
            },
            (SessionState::Streaming, TransportEvent::CharacteristicChanged { characteristic, .. }) => {
                self.on_characteristic_changed(characteristic);
            },
            (_, TransportEvent::CharacteristicRead { characteristic, status }) => {
                debug!("Characteristic read {} {:?}", characteristic, status);
            },
            (_, TransportEvent::CharacteristicWritten { characteristic, status }) => {
                debug!("Characteristic written {} {:?}", characteristic, status);
            },
            (state, event) => {
                debug!("Ignoring {:?} in state {:?}", event, state);
            },
        }

        self.check_invariant();
    }

    /// Tears the connection down. Valid in every state; repeated calls do nothing.
    pub fn disconnect(&mut self) {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Disconnected;
            },
            SessionState::Disconnected | SessionState::Failed(_) => {},
            _ => {
                info!("Disconnecting in state {:?}", self.state);
                self.release();
                self.state = SessionState::Disconnected;
                self.dispatcher.publish(SessionEvent::Disconnected);
            },
        }

        self.check_invariant();
    }

    fn on_connected(&mut self) {
        self.transport = self.pending.take();
        self.state = SessionState::Connected;
        info!("Connected; Discovering services...");
        self.dispatcher.publish(SessionEvent::Connected);

        self.request(|transport| transport.discover_services());
    }

    fn on_services_discovered(&mut self, status: GattStatus, services: &[DiscoveredService]) {
        for service in services {
            debug!("service {}", service.uuid);
        }

        if !status.is_success() {
            warn!("Service discovery failed with status {:?}", status);
            self.fail(FailureReason::ServiceUnavailable, SessionEvent::ServiceUnavailable);
            return;
        }

        let service = services.iter().find(|service| service.uuid == self.profile.service);
        if let Some(service) = service {
            for characteristic in &service.characteristics {
                debug!("characteristic {}", characteristic.uuid);
            }
        }

        let resolved = service.map_or(false, |service| {
            service.characteristics.iter().any(|c| c.uuid == self.profile.data_characteristic)
        });

        if !resolved {
            warn!("Service {} or characteristic {} not found", self.profile.service, self.profile.data_characteristic);
            self.fail(FailureReason::ServiceUnavailable, SessionEvent::ServiceUnavailable);
            return;
        }

        self.state = SessionState::ServicesDiscovered;
        self.enable_notifications();
    }

    // Marking the characteristic does not tell the peripheral anything, the descriptor write
    // does. Both are needed, in this order.
    fn enable_notifications(&mut self) {
        let profile = self.profile;
        info!("Subscribing to characteristic {} {}", profile.service, profile.data_characteristic);

        if !self.request(|transport| transport.set_notify(profile.service, profile.data_characteristic, true)) {
            return;
        }

        let written = self.request(|transport| {
            transport.write_descriptor(profile.data_characteristic, profile.notify_descriptor, &ENABLE_NOTIFICATION_VALUE)
        });

        if written {
            self.state = SessionState::NotifyEnabling;
        }
    }

    fn on_characteristic_changed(&mut self, characteristic: uuid::Uuid) {
        debug!("Characteristic changed {}", characteristic);

        let value = self.transport
            .as_ref()
            .and_then(|transport| transport.read_characteristic_value(self.profile.data_characteristic))
            .unwrap_or_default();

        match decode(&value) {
            Ok(reading) => self.dispatcher.publish(SessionEvent::Reading(reading)),
            Err(err) => {
                warn!("Failed to decode accelerometer value {:?}: {}", value, err);
                self.dispatcher.publish(SessionEvent::TransportError(ErrorKind::MalformedPayload));
            },
        }
    }

    /// Issues a request on the connected transport. A request that cannot be issued ends the
    /// session.
    fn request<F>(&mut self, issue: F) -> bool
    where
        F: FnOnce(&mut T) -> Result<(), DeviceError>,
    {
        let result = match self.transport.as_mut() {
            Some(transport) => issue(transport),
            None => Err(DeviceError::WorkerStopped),
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("Transport request failed in state {:?}: {}", self.state, err);
                self.fail(FailureReason::RequestFailed, SessionEvent::TransportError(ErrorKind::RequestFailed));
                false
            },
        }
    }

    fn fail(&mut self, reason: FailureReason, event: SessionEvent) {
        self.release();
        self.state = SessionState::Failed(reason);
        self.error = Some(ErrorKind::from(reason));
        self.dispatcher.publish(event);
    }

    fn release(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if let Some(link) = self.pending.take() {
            link.close();
        }
    }

    fn check_invariant(&self) {
        debug_assert_eq!(self.transport.is_some(), self.state.holds_transport(), "state {:?}", self.state);
        debug_assert!(self.pending.is_none() || self.state == SessionState::Connecting, "state {:?}", self.state);
    }
}

impl<T: GattTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.release();
    }
}
