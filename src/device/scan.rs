use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use log::{debug, info, warn};
use tokio::time::{sleep, Duration, Instant};

use crate::config::types::Config;
use crate::device::btle::peripheral_identifier;
use crate::device::constants::SCAN_POLL_DELAY;
use crate::device::types::DeviceHandle;
use crate::error::DeviceError;

/// How to pick the peripheral to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Connect to exactly this peripheral, ignoring names.
    pub device_id: Option<String>,
    /// Otherwise, the first peripheral whose local name starts with this.
    pub name_prefix: String,
    pub timeout: Duration,
}

impl From<&Config> for ScanOptions {
    fn from(config: &Config) -> Self {
        ScanOptions {
            device_id: config.device_id.clone(),
            name_prefix: config.device_name_prefix.clone(),
            timeout: Duration::from_millis(config.scan_timeout_ms),
        }
    }
}

impl ScanOptions {
    pub fn matches(&self, identifier: &str, local_name: Option<&str>) -> bool {
        match &self.device_id {
            Some(device_id) => device_id.eq_ignore_ascii_case(identifier),
            None => local_name.map_or(false, |name| name.starts_with(&self.name_prefix)),
        }
    }
}

async fn start_scanning(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    let adapters = manager.adapters().await?;
    if adapters.is_empty() {
        return Err(DeviceError::NoAdapter);
    }

    // micro:bits do not advertise the accelerometer service, so names are matched instead
    for adapter in &adapters {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(ScanFilter::default()).await?;
    }

    Ok(adapters)
}

async fn stop_scanning(adapters: &[Adapter]) {
    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            debug!("Failed to stop scanning: {:?}", err);
        }
    }
}

async fn match_peripheral(adapters: &[Adapter], options: &ScanOptions) -> Option<(Adapter, DeviceHandle)> {
    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                    continue;
                },
                Ok(None) => continue,
                Ok(Some(properties)) => properties,
            };

            let identifier = peripheral_identifier(&peripheral);
            let local_name = properties.local_name.as_deref();

            if options.matches(&identifier, local_name) {
                info!(
                    "Using peripheral {} {:?} {}",
                    identifier,
                    properties.address_type,
                    local_name.unwrap_or("NONE"),
                );

                let handle = DeviceHandle { id: identifier, name: properties.local_name.clone() };
                return Some((adapter.clone(), handle));
            }
        }
    }

    None
}

/// Scans every adapter until a peripheral matching `options` shows up or the timeout passes.
pub async fn find_device(manager: &Manager, options: &ScanOptions) -> Result<Option<(Adapter, DeviceHandle)>, DeviceError> {
    let adapters = start_scanning(manager).await?;
    let deadline = Instant::now() + options.timeout;

    let found = loop {
        if let Some(found) = match_peripheral(&adapters, options).await {
            break Some(found);
        }

        if Instant::now() >= deadline {
            debug!("No peripherals matched");
            break None;
        }

        sleep(Duration::from_millis(SCAN_POLL_DELAY)).await;
    };

    stop_scanning(&adapters).await;
    Ok(found)
}
