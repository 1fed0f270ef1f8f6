//! [`GattConnector`] on top of btleplug.
//!
//! Each connection gets its own worker task. The worker resolves the peripheral, connects,
//! then executes queued requests one at a time while forwarding adapter disconnect events and
//! value notifications to the session. Notified values are cached per characteristic for
//! `read_characteristic_value`.
//!
//! Closing a transport only cancels its worker, which then disconnects the peripheral on its
//! own. Call [`BtleConnector::shutdown`] before the runtime goes away so those disconnects
//! complete.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{make_client_characteristic_config_uuid, GATT_ERROR, SHUTDOWN_TIMEOUT};
use crate::device::transport::{CallbackSink, GattConnector, GattTransport};
use crate::device::types::{DeviceHandle, DiscoveredCharacteristic, DiscoveredService, GattStatus, LinkState, TransportEvent};
use crate::error::DeviceError;

type ValueCache = Arc<Mutex<HashMap<Uuid, Vec<u8>>>>;

#[derive(Debug)]
enum Command {
    DiscoverServices,
    SetNotify { characteristic: Uuid, enabled: bool },
    WriteDescriptor { characteristic: Uuid, descriptor: Uuid, value: Vec<u8> },
}

pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// The id a [`DeviceHandle`] uses for `peripheral`: its address, or the platform id where the
/// address is hidden (macOS).
pub fn peripheral_identifier(peripheral: &Peripheral) -> String {
    let address = peripheral.address().to_string();
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(&peripheral.id())
    } else {
        address
    }
}

async fn find_peripheral(adapter: &Adapter, device_id: &str) -> Result<Option<Peripheral>, DeviceError> {
    let peripherals = adapter.peripherals().await?;
    Ok(peripherals
        .into_iter()
        .find(|peripheral| peripheral_identifier(peripheral).eq_ignore_ascii_case(device_id)))
}

fn status_of(result: Result<(), btleplug::Error>) -> GattStatus {
    match result {
        Ok(()) => GattStatus::Success,
        Err(err) => {
            warn!("GATT operation failed: {:?}", err);
            GattStatus::Failure(GATT_ERROR)
        },
    }
}

/// The tasks spawned for connections, so they can be waited on before the runtime stops.
#[derive(Debug, Default)]
pub struct WorkerSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerSet {
    pub fn spawn<F>(&self, runtime: &Handle, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|handle| !handle.is_finished());
        handles.push(runtime.spawn(worker));
    }

    pub fn running(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Waits for every spawned worker to finish. Workers still running after `timeout` are
    /// aborted. Returns the number of workers that were aborted.
    pub async fn join(&self, timeout: Duration) -> usize {
        let handles = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *handles)
        };

        let mut aborted = 0;
        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => warn!("Connection worker ended abnormally: {}", err),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                },
            }
        }
        aborted
    }
}

pub struct BtleConnector {
    adapter: Adapter,
    runtime: Handle,
    workers: WorkerSet,
}

impl BtleConnector {
    pub fn new(adapter: Adapter, runtime: Handle) -> Self {
        BtleConnector { adapter, runtime, workers: WorkerSet::default() }
    }

    /// Waits for the workers of closed transports to disconnect their peripheral.
    ///
    /// Close every transport first (deactivate the session), otherwise this waits for the
    /// timeout and aborts the workers that are still connected.
    pub async fn shutdown(&self) {
        debug!("Waiting for {} connection worker(s)", self.workers.running());
        let aborted = self.workers.join(Duration::from_millis(SHUTDOWN_TIMEOUT)).await;
        if aborted > 0 {
            warn!("{} connection worker(s) did not stop in time", aborted);
        }
    }
}

impl GattConnector for BtleConnector {
    type Transport = BtleTransport;

    fn connect(&self, handle: &DeviceHandle, callbacks: CallbackSink<BtleTransport>) -> Result<BtleTransport, DeviceError> {
        let (commands, command_receiver) = unbounded::<Command>();
        let cancel = CancellationToken::new();
        let values: ValueCache = Arc::new(Mutex::new(HashMap::new()));

        let worker = Worker {
            adapter: self.adapter.clone(),
            device_id: handle.id.clone(),
            callbacks,
            values: values.clone(),
            marked: None,
        };
        self.workers.spawn(&self.runtime, worker.run(cancel.clone(), command_receiver));

        Ok(BtleTransport { commands, cancel, values })
    }
}

pub struct BtleTransport {
    commands: UnboundedSender<Command>,
    cancel: CancellationToken,
    values: ValueCache,
}

impl BtleTransport {
    fn send(&self, command: Command) -> Result<(), DeviceError> {
        self.commands
            .unbounded_send(command)
            .map_err(|_| DeviceError::WorkerStopped)
    }
}

impl GattTransport for BtleTransport {
    fn discover_services(&mut self) -> Result<(), DeviceError> {
        self.send(Command::DiscoverServices)
    }

    fn set_notify(&mut self, _service: Uuid, characteristic: Uuid, enabled: bool) -> Result<(), DeviceError> {
        self.send(Command::SetNotify { characteristic, enabled })
    }

    fn write_descriptor(&mut self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<(), DeviceError> {
        self.send(Command::WriteDescriptor { characteristic, descriptor, value: value.to_vec() })
    }

    fn read_characteristic_value(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(&characteristic).cloned()
    }

    fn close(self) {
        // the worker disconnects the peripheral on its way out
        self.cancel.cancel();
    }
}

struct Worker {
    adapter: Adapter,
    device_id: String,
    callbacks: CallbackSink<BtleTransport>,
    values: ValueCache,
    // set by SetNotify, consumed by a write to the configuration descriptor
    marked: Option<Characteristic>,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken, mut commands: UnboundedReceiver<Command>) {
        let resolved = tokio::select! {
            _ = cancel.cancelled() => return,
            resolved = self.resolve() => resolved,
        };

        let peripheral = match resolved {
            Ok(peripheral) => peripheral,
            Err(err) => {
                warn!("Connecting to peripheral failed: {}", err);
                self.link_state(GattStatus::Failure(GATT_ERROR), LinkState::Disconnected);
                return;
            },
        };

        info!("Connecting to peripheral {}...", self.device_id);
        let connected = tokio::select! {
            _ = cancel.cancelled() => None,
            result = peripheral.connect() => Some(result),
        };

        match connected {
            Some(Ok(())) => {},
            Some(Err(err)) => {
                warn!("Connecting to peripheral failed: {:?}", err);
                self.link_state(GattStatus::Failure(GATT_ERROR), LinkState::Disconnected);
                disconnect(&peripheral, &self.device_id).await;
                return;
            },
            None => {
                // a connect that was cut short may still have opened the link
                disconnect(&peripheral, &self.device_id).await;
                return;
            },
        }

        if !cancel.is_cancelled() {
            self.link_state(GattStatus::Success, LinkState::Connected);

            if let Err(err) = self.pump(&peripheral, &cancel, &mut commands).await {
                warn!("Connection to peripheral failed: {}", err);
                self.link_state(GattStatus::Failure(GATT_ERROR), LinkState::Disconnected);
            }
        }

        disconnect(&peripheral, &self.device_id).await;
    }

    async fn resolve(&self) -> Result<Peripheral, DeviceError> {
        find_peripheral(&self.adapter, &self.device_id)
            .await?
            .ok_or_else(|| DeviceError::UnknownPeripheral { id: self.device_id.clone() })
    }

    async fn pump(&mut self, peripheral: &Peripheral, cancel: &CancellationToken, commands: &mut UnboundedReceiver<Command>) -> Result<(), DeviceError> {
        let mut notifications = peripheral.notifications().await?;
        let mut central_events = self.adapter.events().await?;
        let peripheral_id = peripheral.id();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Ok(());
                },
                command = commands.next() => match command {
                    Some(command) => self.execute(peripheral, command).await,
                    // the transport was dropped
                    None => return Ok(()),
                },
                Some(event) = central_events.next() => {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        if id == peripheral_id {
                            warn!("Connection lost");
                            self.link_state(GattStatus::Success, LinkState::Disconnected);
                            return Ok(());
                        }
                    }
                },
                Some(data) = notifications.next() => {
                    {
                        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
                        values.insert(data.uuid, data.value.clone());
                    }
                    self.callbacks.deliver(TransportEvent::CharacteristicChanged {
                        characteristic: data.uuid,
                        value: data.value,
                    });
                },
            }
        }
    }

    async fn execute(&mut self, peripheral: &Peripheral, command: Command) {
        debug!("Executing {:?}", command);

        match command {
            Command::DiscoverServices => {
                let event = match peripheral.discover_services().await {
                    Ok(()) => TransportEvent::ServicesDiscovered {
                        status: GattStatus::Success,
                        services: discovered_services(peripheral),
                    },
                    Err(err) => {
                        warn!("Discovering services failed: {:?}", err);
                        TransportEvent::ServicesDiscovered {
                            status: GattStatus::Failure(GATT_ERROR),
                            services: Vec::new(),
                        }
                    },
                };
                self.callbacks.deliver(event);
            },
            Command::SetNotify { characteristic, enabled } => {
                self.marked = match enabled {
                    true => peripheral.characteristics().into_iter().find(|c| c.uuid == characteristic),
                    false => None,
                };
                if enabled && self.marked.is_none() {
                    warn!("Characteristic {} is not available for notifications", characteristic);
                }
            },
            Command::WriteDescriptor { characteristic, descriptor, value } => {
                let status = if descriptor == make_client_characteristic_config_uuid() {
                    self.write_notify_config(peripheral, characteristic, &value).await
                } else {
                    write_plain_descriptor(peripheral, characteristic, descriptor, &value).await
                };

                self.callbacks.deliver(TransportEvent::DescriptorWritten { descriptor, status });
            },
        }
    }

    // btleplug owns the configuration descriptor; subscribing is how it gets written.
    async fn write_notify_config(&mut self, peripheral: &Peripheral, characteristic: Uuid, value: &[u8]) -> GattStatus {
        let marked = match &self.marked {
            Some(marked) if marked.uuid == characteristic => marked,
            _ => {
                warn!("Configuration descriptor of {} written before it was marked for notification", characteristic);
                return GattStatus::Failure(GATT_ERROR);
            },
        };

        let enable = value.first().map_or(false, |flags| *flags != 0);
        if enable {
            status_of(peripheral.subscribe(marked).await)
        } else {
            status_of(peripheral.unsubscribe(marked).await)
        }
    }

    fn link_state(&self, status: GattStatus, state: LinkState) {
        self.callbacks.deliver(TransportEvent::ConnectionStateChanged { status, state });
    }
}

async fn disconnect(peripheral: &Peripheral, device_id: &str) {
    info!("Disconnecting from peripheral {}", device_id);
    if let Err(err) = peripheral.disconnect().await {
        debug!("Disconnecting failed: {:?}", err);
    }
}

async fn write_plain_descriptor(peripheral: &Peripheral, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> GattStatus {
    let target = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic)
        .and_then(|c| c.descriptors.into_iter().find(|d| d.uuid == descriptor));

    match target {
        Some(target) => status_of(peripheral.write_descriptor(&target, value).await),
        None => {
            warn!("Descriptor {} of {} not found", descriptor, characteristic);
            GattStatus::Failure(GATT_ERROR)
        },
    }
}

fn discovered_services(peripheral: &Peripheral) -> Vec<DiscoveredService> {
    peripheral
        .services()
        .into_iter()
        .map(|service| DiscoveredService {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|characteristic| DiscoveredCharacteristic {
                    uuid: characteristic.uuid,
                    descriptors: characteristic.descriptors.into_iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        })
        .collect()
}
