use serde::{Deserialize, Serialize};

use crate::device::constants::{MICROBIT_NAME_PREFIX, SCAN_TIMEOUT};
use crate::device::types::SensorProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub device_id: Option<String>,
    pub device_name_prefix: String,
    pub scan_timeout_ms: u64,
    pub profile: SensorProfile,
}

impl Config {
    pub fn normalize_device_id(&mut self) {
        self.device_id = self.device_id
            .take()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_id: None,
            device_name_prefix: MICROBIT_NAME_PREFIX.to_string(),
            scan_timeout_ms: SCAN_TIMEOUT,
            profile: SensorProfile::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{ "deviceId": "AA:BB:CC:DD:EE:FF" }"#).unwrap();
        assert_eq!(config.device_id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(config.device_name_prefix, "BBC micro:bit");
        assert_eq!(config.scan_timeout_ms, 5000);
        assert_eq!(config.profile, SensorProfile::default());
    }

    #[test]
    fn profile_can_be_overridden() {
        let config: Config = serde_json::from_str(r#"{
            "profile": {
                "service": "0000ffe0-0000-1000-8000-00805f9b34fb",
                "dataCharacteristic": "0000ffe1-0000-1000-8000-00805f9b34fb",
                "notifyDescriptor": "00002902-0000-1000-8000-00805f9b34fb"
            }
        }"#).unwrap();
        assert_eq!(config.profile.service, Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb));
        assert_eq!(config.profile.data_characteristic, Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb));
    }

    #[test]
    fn blank_device_id_is_dropped() {
        let mut config = Config { device_id: Some("  ".to_string()), ..Config::default() };
        config.normalize_device_id();
        assert_eq!(config.device_id, None);

        let mut config = Config { device_id: Some(" AA:BB ".to_string()), ..Config::default() };
        config.normalize_device_id();
        assert_eq!(config.device_id.as_deref(), Some("AA:BB"));
    }
}
