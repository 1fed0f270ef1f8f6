//! Drives a full session through the lifecycle owner with the in-memory transport.

use std::thread;

use futures::StreamExt;
use microbit_accel::device::dispatcher::{EventDispatcher, EventReceiver};
use microbit_accel::device::lifecycle::SessionOwner;
use microbit_accel::device::mock::{accelerometer_services, MockConnector, TransportCall};
use microbit_accel::device::types::{DeviceHandle, GattStatus, LinkState, Reading, SensorProfile, SessionEvent, SessionState, TransportEvent};
use microbit_accel::error::ErrorKind;

fn owner() -> (SessionOwner<MockConnector>, MockConnector, EventReceiver) {
    let connector = MockConnector::new();
    let (dispatcher, receiver) = EventDispatcher::channel();
    let owner = SessionOwner::new(connector.clone(), SensorProfile::default(), dispatcher);
    (owner, connector, receiver)
}

fn bring_up(connector: &MockConnector) {
    connector.deliver(TransportEvent::ConnectionStateChanged { status: GattStatus::Success, state: LinkState::Connected });
    connector.deliver(TransportEvent::ServicesDiscovered {
        status: GattStatus::Success,
        services: accelerometer_services(&SensorProfile::default()),
    });
    connector.deliver(TransportEvent::DescriptorWritten {
        descriptor: SensorProfile::default().notify_descriptor,
        status: GattStatus::Success,
    });
}

fn notify(connector: &MockConnector, value: &[u8]) {
    let characteristic = SensorProfile::default().data_characteristic;
    connector.set_value(characteristic, value.to_vec());
    connector.deliver(TransportEvent::CharacteristicChanged { characteristic, value: value.to_vec() });
}

#[test]
fn streams_readings_end_to_end() {
    let (mut owner, connector, mut receiver) = owner();
    owner.activate(Some(DeviceHandle::with_name("C7:2A:11:00:42:9E", "BBC micro:bit [zogat]"))).unwrap();

    bring_up(&connector);
    assert_eq!(owner.state(), Some(SessionState::Streaming));

    notify(&connector, &[0xE8, 0x03, 0x00, 0x00, 0x18, 0xFC]);
    notify(&connector, &[0x01]);

    owner.deactivate();

    assert_eq!(receiver.drain(), vec![
        SessionEvent::Connected,
        SessionEvent::NotificationsEnabled(true),
        SessionEvent::Reading(Reading { x: 1.0, y: 0.0, z: -1.0 }),
        SessionEvent::TransportError(ErrorKind::MalformedPayload),
        SessionEvent::Disconnected,
    ]);
    assert_eq!(connector.close_count(), 1);
    assert_eq!(connector.calls()[0], TransportCall::Connect("C7:2A:11:00:42:9E".to_string()));
}

#[test]
fn stale_callbacks_after_deactivate_do_nothing() {
    let (mut owner, connector, mut receiver) = owner();
    owner.activate(Some(DeviceHandle::new("id"))).unwrap();
    bring_up(&connector);
    let stale = connector.sinks().pop().unwrap();

    owner.deactivate();
    receiver.drain();
    let calls = connector.calls();

    stale.deliver(TransportEvent::ConnectionStateChanged { status: GattStatus::Success, state: LinkState::Disconnected });
    notify(&connector, &[0u8; 6]);

    assert_eq!(receiver.drain(), vec![]);
    assert_eq!(owner.state(), None);
    // the notification was cached but nothing read it
    assert_eq!(connector.calls(), calls);
    assert_eq!(connector.close_count(), 1);
}

#[test]
fn callbacks_of_a_previous_generation_are_ignored() {
    let (mut owner, connector, mut receiver) = owner();
    owner.activate(Some(DeviceHandle::new("id"))).unwrap();
    let first = connector.sinks().pop().unwrap();
    owner.deactivate();

    assert_eq!(owner.activate(Some(DeviceHandle::new("id"))), Ok(2));
    assert_eq!(receiver.drain(), vec![SessionEvent::Disconnected]);
    first.deliver(TransportEvent::ConnectionStateChanged { status: GattStatus::Success, state: LinkState::Connected });

    assert_eq!(owner.state(), Some(SessionState::Connecting));
    assert_eq!(receiver.drain(), vec![]);
    assert_eq!(first.generation(), 1);
}

#[test]
fn callbacks_from_worker_threads_are_serialized() {
    let (mut owner, connector, receiver) = owner();
    owner.activate(Some(DeviceHandle::new("id"))).unwrap();
    bring_up(&connector);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let connector = connector.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    notify(&connector, &[0xE8, 0x03, 0xE8, 0x03, 0xE8, 0x03]);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    drop(owner);

    let events: Vec<SessionEvent> = futures::executor::block_on(receiver.collect());
    let readings = events.iter().filter(|event| matches!(event, SessionEvent::Reading(_))).count();
    assert_eq!(readings, 100);
    assert_eq!(events.last(), Some(&SessionEvent::Disconnected));
}
