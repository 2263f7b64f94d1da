//! Defines shared data structures for the Bluetooth module.

use std::fmt;

/// Represents a discovered Omi device
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DiscoveredDevice {
    /// Platform-specific unique identifier for the device (especially important on macOS)
    pub id: String,
    /// The name of the device
    pub name: String,
    /// The signal strength (RSSI) of the device
    pub rssi: i16,
}

impl DiscoveredDevice {
    /// Creates a new DiscoveredDevice instance
    pub fn new(id: String, name: String, rssi: i16) -> Self {
        Self { id, name, rssi }
    }
}

/// Phase of the single logical device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// Audio encoding reported by the connected device
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Pcm16,
    Pcm8,
    Mulaw16,
    Mulaw8,
    Opus,
    Unknown,
}

impl AudioCodec {
    /// Maps the codec id the device firmware reports to its identifier.
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Self::Pcm16,
            1 => Self::Pcm8,
            10 => Self::Mulaw16,
            11 => Self::Mulaw8,
            20 => Self::Opus,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pcm16 => "PCM16",
            Self::Pcm8 => "PCM8",
            Self::Mulaw16 => "muLaw16",
            Self::Mulaw8 => "muLaw8",
            Self::Opus => "Opus",
            Self::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// UI-facing snapshot of the coordinator's state
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceSnapshot {
    /// Devices found by the most recent scan
    pub devices: Vec<DiscoveredDevice>,
    pub is_scanning: bool,
    pub connection_phase: ConnectionPhase,
    pub connected_device_id: Option<String>,
    pub connected_device_name: Option<String>,
    /// Battery percentage, absent until queried successfully
    pub battery_level: Option<u8>,
    pub audio_codec: Option<AudioCodec>,
    pub is_streaming_audio: bool,
    pub is_connecting: bool,
    /// Last stored error message, dismissable by the consumer
    pub error: Option<String>,
    /// True once BLE capability acquisition has failed
    pub ble_unavailable: bool,
}

impl DeviceSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection_phase == ConnectionPhase::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_ids_match_firmware_values() {
        assert_eq!(AudioCodec::from_id(0), AudioCodec::Pcm16);
        assert_eq!(AudioCodec::from_id(1), AudioCodec::Pcm8);
        assert_eq!(AudioCodec::from_id(10), AudioCodec::Mulaw16);
        assert_eq!(AudioCodec::from_id(11), AudioCodec::Mulaw8);
        assert_eq!(AudioCodec::from_id(20), AudioCodec::Opus);
        assert_eq!(AudioCodec::from_id(42), AudioCodec::Unknown);
    }

    #[test]
    fn codec_display_names() {
        assert_eq!(AudioCodec::Opus.to_string(), "Opus");
        assert_eq!(AudioCodec::Pcm8.to_string(), "PCM8");
    }
}
