//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and other configuration values.

use uuid::Uuid;

/// Advertised name prefix of the Omi wearable
pub const OMI_NAME_PREFIX: &str = "Omi";

/// Standard Bluetooth Service UUIDs
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// The UUID of the Omi wearable service
pub const UUID_OMI_SERVICE: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);

/// The UUID of the raw audio-bytes notification characteristic
pub const UUID_AUDIO_BYTES_CHAR: Uuid = Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1214);

/// The UUID of the audio codec characteristic
pub const UUID_AUDIO_CODEC_CHAR: Uuid = Uuid::from_u128(0x19b10002_e8f2_537e_4f6c_d104768a1214);

/// Scan window in milliseconds, enforced by the coordinator
pub const SCAN_TIMEOUT_MS: u64 = 15_000;

/// Default capacity of the device event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Error message stored when no BLE capability can be acquired
pub const BLE_UNAVAILABLE_MESSAGE: &str =
    "Bluetooth is unavailable. Omi requires a working BLE adapter on this system.";

/// Error message stored when the SDK reports an unsuccessful connect
pub const CONNECTION_FAILED_MESSAGE: &str = "Connection failed";
