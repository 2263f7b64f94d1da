//! Device events pushed to UI consumers over a broadcast channel.
//! A lagging subscriber loses old events; it never blocks the coordinator.

use crate::core::bluetooth::types::{AudioCodec, ConnectionPhase, DiscoveredDevice};

/// Events emitted by the coordinator as its state changes
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum DeviceEvent {
    ScanStarted,
    DeviceFound(DiscoveredDevice),
    ScanCompleted,
    PhaseChanged(ConnectionPhase),
    BatteryUpdated(Option<u8>),
    CodecUpdated(Option<AudioCodec>),
    AudioStreamStarted,
    AudioStreamStopped,
    ErrorOccurred(String),
}
