use std::time::Duration;
use btleplug::platform::Manager;
use btleplug::api::Manager as _;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::runtime::Handle;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleConnector;
use crate::device::dispatcher::{EventDispatcher, EventReceiver};
use crate::device::lifecycle::SessionOwner;
use crate::device::scan::{find_device, ScanOptions};
use crate::device::types::SessionEvent;
use crate::error::{AppRunError, DeviceError};

/// Command line overrides for a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub device_id: Option<String>,
    pub scan_timeout: Option<Duration>,
    /// Write the device that was used back to the config file.
    pub save_device: bool,
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                // this is probably the first start of the app
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", &err);
            }
            Config::default()
        },
    }
}

fn apply_options(config: &mut Config, options: &RunOptions) {
    if let Some(device_id) = &options.device_id {
        config.device_id = Some(device_id.clone());
        config.normalize_device_id();
    }
    if let Some(timeout) = options.scan_timeout {
        config.scan_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    }
}

/// Shows one event, returns true once the session is over.
fn show_event(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::Reading(reading) => println!("{}", reading),
        SessionEvent::TransportError(kind) => warn!("{}", kind),
        _ => {
            info!("{}", event.status_text());
            println!("{}", event.status_text());
        },
    }

    event.ends_session()
}

async fn consume_events(mut events: EventReceiver) -> Result<(), AppRunError> {
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted, closing the session");
                return Ok(());
            },
            event = events.next() => match event {
                Some(event) => {
                    if show_event(&event) {
                        return Ok(());
                    }
                },
                None => return Ok(()),
            },
        }
    }
}

pub async fn run_application(options: RunOptions) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    // only one instance may talk to the device
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let mut config = load_config(&config_io).await;
    apply_options(&mut config, &options);

    let manager = Manager::new().await.map_err(DeviceError::from)?;
    let (adapter, handle) = find_device(&manager, &ScanOptions::from(&config))
        .await?
        .ok_or(AppRunError::NoDevice)?;

    if options.save_device && config.device_id.as_deref() != Some(handle.id.as_str()) {
        config.device_id = Some(handle.id.clone());
        config_io.save(config.clone()).await?;
    }

    let (dispatcher, events) = EventDispatcher::channel();
    let connector = BtleConnector::new(adapter, Handle::current());
    let mut owner = SessionOwner::new(connector, config.profile, dispatcher);

    owner.activate(Some(handle))?;
    let result = consume_events(events).await;
    if let Some(kind) = owner.error() {
        warn!("Session ended: {}", kind);
    }
    owner.deactivate();
    // the peripheral is disconnected by its worker, which must finish before the runtime stops
    owner.connector().shutdown().await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::Reading;
    use crate::error::ErrorKind;

    #[test]
    fn options_override_config() {
        let mut config = Config { device_id: Some("old".to_string()), ..Config::default() };
        let options = RunOptions {
            device_id: Some(" new ".to_string()),
            scan_timeout: Some(Duration::from_secs(2)),
            save_device: false,
        };

        apply_options(&mut config, &options);

        assert_eq!(config.device_id.as_deref(), Some("new"));
        assert_eq!(config.scan_timeout_ms, 2000);
    }

    #[test]
    fn no_options_keep_config() {
        let mut config = Config { device_id: Some("old".to_string()), ..Config::default() };
        apply_options(&mut config, &RunOptions::default());
        assert_eq!(config, Config { device_id: Some("old".to_string()), ..Config::default() });
    }

    #[test]
    fn readings_keep_the_session_going() {
        assert!(!show_event(&SessionEvent::Reading(Reading { x: 0.0, y: 0.0, z: 1.0 })));
        assert!(!show_event(&SessionEvent::TransportError(ErrorKind::MalformedPayload)));
        assert!(show_event(&SessionEvent::ServiceUnavailable));
    }
}
