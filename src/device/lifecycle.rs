use std::sync::{Arc, Mutex, PoisonError};
use log::{debug, info};

use crate::device::dispatcher::EventDispatcher;
use crate::device::session::{Session, SessionSlot};
use crate::device::transport::{CallbackSink, GattConnector};
use crate::device::types::{DeviceHandle, Generation, SensorProfile, SessionState};
use crate::error::{ErrorKind, SessionError};

/// Binds a [`Session`] to the consumer's activate/deactivate lifecycle.
///
/// Holds at most one live session. The device handle is kept for exactly as long as that
/// session exists. Dropping the owner deactivates it.
pub struct SessionOwner<C: GattConnector> {
    connector: C,
    profile: SensorProfile,
    dispatcher: EventDispatcher,
    slot: Arc<SessionSlot<C::Transport>>,
    handle: Option<DeviceHandle>,
    last_generation: Generation,
}

impl<C: GattConnector> SessionOwner<C> {
    pub fn new(connector: C, profile: SensorProfile, dispatcher: EventDispatcher) -> Self {
        SessionOwner {
            connector,
            profile,
            dispatcher,
            slot: Arc::new(Mutex::new(None)),
            handle: None,
            last_generation: 0,
        }
    }

    /// Creates a session for `handle` and starts connecting.
    ///
    /// Without a handle the new session stays idle and `TransportUnavailable` is returned;
    /// nothing is published in that case.
    pub fn activate(&mut self, handle: Option<DeviceHandle>) -> Result<Generation, SessionError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if slot.as_ref().map_or(false, |session| session.is_live()) {
            return Err(SessionError::AlreadyActive);
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        let mut session = Session::new(self.profile, generation, self.dispatcher.clone());
        let callbacks = CallbackSink::new(generation, Arc::downgrade(&self.slot));

        info!("Activating session {}", generation);
        let result = session.connect(handle.as_ref(), &self.connector, callbacks);

        // replaces a session that already ended; dropping it releases nothing new
        *slot = Some(session);
        self.handle = handle;

        result.map(|_| generation)
    }

    /// Disconnects and drops the current session, if any. Safe to call at any time.
    pub fn deactivate(&mut self) {
        let session = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take()
        };

        match session {
            Some(mut session) => {
                info!("Deactivating session {}", session.generation());
                session.disconnect();
            },
            None => debug!("Deactivate without a session"),
        }

        self.handle = None;
    }

    pub fn state(&self) -> Option<SessionState> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|session| session.state())
    }

    /// Why the current session stopped or did not start, see [`Session::error`].
    pub fn error(&self) -> Option<ErrorKind> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().and_then(|session| session.error())
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The generation of the most recently activated session, 0 before the first activation.
    pub fn generation(&self) -> Generation {
        self.last_generation
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }
}

impl<C: GattConnector> Drop for SessionOwner<C> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dispatcher::EventReceiver;
    use crate::device::mock::{accelerometer_services, MockConnector};
    use crate::device::types::{GattStatus, LinkState, SessionEvent, TransportEvent};

    fn owner() -> (SessionOwner<MockConnector>, MockConnector, EventReceiver) {
        let connector = MockConnector::new();
        let (dispatcher, receiver) = EventDispatcher::channel();
        (SessionOwner::new(connector.clone(), SensorProfile::default(), dispatcher), connector, receiver)
    }

    fn link_up() -> TransportEvent {
        TransportEvent::ConnectionStateChanged { status: GattStatus::Success, state: LinkState::Connected }
    }

    #[test]
    fn deactivate_without_activate_is_safe() {
        let (mut owner, connector, mut receiver) = owner();
        owner.deactivate();
        owner.deactivate();
        assert_eq!(owner.state(), None);
        assert_eq!(connector.close_count(), 0);
        assert_eq!(receiver.drain(), vec![]);
    }

    #[test]
    fn activate_without_handle_stays_idle() {
        let (mut owner, connector, mut receiver) = owner();
        assert_eq!(owner.activate(None), Err(SessionError::TransportUnavailable));
        assert_eq!(owner.state(), Some(SessionState::Idle));
        assert!(connector.calls().is_empty());
        assert_eq!(receiver.drain(), vec![]);

        // an idle session does not block a later activation
        assert!(owner.activate(Some(DeviceHandle::new("id"))).is_ok());
        assert_eq!(owner.state(), Some(SessionState::Connecting));
    }

    #[test]
    fn only_one_live_session() {
        let (mut owner, connector, _receiver) = owner();
        assert_eq!(owner.activate(Some(DeviceHandle::new("id"))), Ok(1));
        assert_eq!(owner.activate(Some(DeviceHandle::new("id"))), Err(SessionError::AlreadyActive));
        assert_eq!(connector.sinks().len(), 1);
        assert_eq!(owner.generation(), 1);
    }

    #[test]
    fn deactivate_releases_transport_once() {
        let (mut owner, connector, mut receiver) = owner();
        owner.activate(Some(DeviceHandle::new("id"))).unwrap();
        connector.deliver(link_up());
        connector.deliver(TransportEvent::ServicesDiscovered {
            status: GattStatus::Success,
            services: accelerometer_services(&SensorProfile::default()),
        });

        owner.deactivate();
        owner.deactivate();

        assert_eq!(connector.close_count(), 1);
        assert_eq!(owner.state(), None);
        assert_eq!(owner.device(), None);
        assert_eq!(receiver.drain(), vec![SessionEvent::Connected, SessionEvent::Disconnected]);
    }

    #[test]
    fn reactivate_after_link_loss() {
        let (mut owner, connector, mut receiver) = owner();
        owner.activate(Some(DeviceHandle::new("id"))).unwrap();
        connector.deliver(link_up());
        connector.deliver(TransportEvent::ConnectionStateChanged {
            status: GattStatus::Failure(0x08),
            state: LinkState::Disconnected,
        });
        assert_eq!(owner.state(), Some(SessionState::Disconnected));

        assert_eq!(owner.activate(Some(DeviceHandle::new("id"))), Ok(2));
        connector.deliver(link_up());

        assert_eq!(owner.state(), Some(SessionState::Connected));
        assert_eq!(receiver.drain(), vec![
            SessionEvent::Connected,
            SessionEvent::Disconnected,
            SessionEvent::Connected,
        ]);
    }

    #[test]
    fn reports_why_the_session_stopped() {
        let (mut owner, connector, _receiver) = owner();
        assert_eq!(owner.error(), None);

        owner.activate(None).unwrap_err();
        assert_eq!(owner.error(), Some(ErrorKind::TransportUnavailable));

        owner.activate(Some(DeviceHandle::new("id"))).unwrap();
        assert_eq!(owner.error(), None);
        connector.deliver(link_up());
        connector.deliver(TransportEvent::ServicesDiscovered { status: GattStatus::Success, services: vec![] });
        assert_eq!(owner.error(), Some(ErrorKind::ServiceUnavailable));

        owner.deactivate();
        assert_eq!(owner.error(), None);
    }

    #[test]
    fn dropping_the_owner_tears_down() {
        let (mut owner, connector, mut receiver) = owner();
        owner.activate(Some(DeviceHandle::new("id"))).unwrap();
        connector.deliver(link_up());

        drop(owner);

        assert_eq!(connector.close_count(), 1);
        assert_eq!(receiver.drain(), vec![SessionEvent::Connected, SessionEvent::Disconnected]);
    }
}
