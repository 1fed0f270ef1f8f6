use uuid::Uuid;

/**
 * The UUID of the BBC micro:bit accelerometer service.
 * See https://lancaster-university.github.io/microbit-docs/resources/bluetooth/bluetooth_profile.html
 */
pub const ACCELEROMETER_SERVICE: &str = "e95d0753-251d-470a-a062-fa1922dfa9a8";

/**
 * The UUID of the characteristic carrying the x, y, z accelerometer samples.
 */
pub const ACCELEROMETER_DATA_CHARACTERISTIC: &str = "e95dca4b-251d-470a-a062-fa1922dfa9a8";

/**
 * The UUID of the Client Characteristic Configuration descriptor (0x2902).
 */
pub const CLIENT_CHARACTERISTIC_CONFIG: &str = "00002902-0000-1000-8000-00805f9b34fb";

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/**
 * Status reported for a failed GATT operation when the stack gives no better one.
 */
pub const GATT_ERROR: u8 = 0x85;

/**
 * Raw accelerometer values are in milli-g.
 */
pub const ACCEL_SCALE: f32 = 1000.0;

/**
 * The smallest payload that holds all three axes.
 */
pub const ACCEL_PAYLOAD_LEN: usize = 6;

/**
 * Local name prefix that micro:bit boards advertise with.
 */
pub const MICROBIT_NAME_PREFIX: &str = "BBC micro:bit";

/**
 * How long (milliseconds) to scan for a micro:bit when no device id is configured.
 */
pub const SCAN_TIMEOUT: u64 = 5000;

/**
 * How often (milliseconds) to look at the scan results while scanning.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) to wait for connection workers to disconnect their peripheral when
 * shutting down.
 */
pub const SHUTDOWN_TIMEOUT: u64 = 3000;

pub fn make_accelerometer_service_uuid() -> Uuid {
    Uuid::from_u128(0xe95d0753_251d_470a_a062_fa1922dfa9a8)
}

pub fn make_accelerometer_data_uuid() -> Uuid {
    Uuid::from_u128(0xe95dca4b_251d_470a_a062_fa1922dfa9a8)
}

pub fn make_client_characteristic_config_uuid() -> Uuid {
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb)
}
