//! In-memory transport for tests.
//!
//! [`MockConnector`] records every request the session makes and keeps the callback sink it was
//! given, so a test decides when and in which order callbacks arrive. Clones share state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::device::transport::{CallbackSink, GattConnector, GattTransport};
use crate::device::types::{DeviceHandle, DiscoveredCharacteristic, DiscoveredService, SensorProfile, TransportEvent};
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(String),
    DiscoverServices,
    SetNotify { service: Uuid, characteristic: Uuid, enabled: bool },
    WriteDescriptor { characteristic: Uuid, descriptor: Uuid, value: Vec<u8> },
    ReadCharacteristic(Uuid),
}

#[derive(Default)]
struct MockState {
    calls: Vec<TransportCall>,
    closed: usize,
    values: HashMap<Uuid, Vec<u8>>,
    refuse_connect: bool,
    fail_requests: bool,
    sinks: Vec<CallbackSink<MockTransport>>,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose `connect` always fails.
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.with_state(|state| state.refuse_connect = true);
        connector
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.with_state(|state| state.calls.clone())
    }

    pub fn close_count(&self) -> usize {
        self.with_state(|state| state.closed)
    }

    /// Sets the cached value returned by `read_characteristic_value`.
    pub fn set_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.with_state(|state| {
            state.values.insert(characteristic, value);
        })
    }

    /// Makes every following transport request fail to be issued.
    pub fn fail_requests(&self, fail: bool) {
        self.with_state(|state| state.fail_requests = fail)
    }

    /// The sinks handed out so far, oldest first.
    pub fn sinks(&self) -> Vec<CallbackSink<MockTransport>> {
        self.with_state(|state| state.sinks.clone())
    }

    /// Delivers `event` through the most recent sink, as the transport's worker would.
    pub fn deliver(&self, event: TransportEvent) {
        // the sink locks the session, which may call back into this mock
        let sink = self.with_state(|state| state.sinks.last().cloned());
        if let Some(sink) = sink {
            sink.deliver(event);
        }
    }
}

impl GattConnector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, handle: &DeviceHandle, callbacks: CallbackSink<MockTransport>) -> Result<MockTransport, DeviceError> {
        self.with_state(|state| {
            if state.refuse_connect {
                return Err(DeviceError::NoAdapter);
            }

            state.calls.push(TransportCall::Connect(handle.id.clone()));
            state.sinks.push(callbacks);
            Ok(MockTransport { state: self.state.clone() })
        })
    }
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn record(&self, call: TransportCall) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail_requests {
            return Err(DeviceError::WorkerStopped);
        }
        state.calls.push(call);
        Ok(())
    }
}

impl GattTransport for MockTransport {
    fn discover_services(&mut self) -> Result<(), DeviceError> {
        self.record(TransportCall::DiscoverServices)
    }

    fn set_notify(&mut self, service: Uuid, characteristic: Uuid, enabled: bool) -> Result<(), DeviceError> {
        self.record(TransportCall::SetNotify { service, characteristic, enabled })
    }

    fn write_descriptor(&mut self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<(), DeviceError> {
        self.record(TransportCall::WriteDescriptor { characteristic, descriptor, value: value.to_vec() })
    }

    fn read_characteristic_value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(TransportCall::ReadCharacteristic(characteristic));
        state.values.get(&characteristic).cloned()
    }

    fn close(self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed += 1;
    }
}

/// The service table of a micro:bit exposing `profile`, next to the generic access service.
pub fn accelerometer_services(profile: &SensorProfile) -> Vec<DiscoveredService> {
    vec![
        DiscoveredService {
            uuid: Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb),
            characteristics: vec![],
        },
        DiscoveredService {
            uuid: profile.service,
            characteristics: vec![DiscoveredCharacteristic {
                uuid: profile.data_characteristic,
                descriptors: vec![profile.notify_descriptor],
            }],
        },
    ]
}
