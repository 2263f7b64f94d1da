//! Omi device bridge library
//! Device connection and audio-streaming coordination for the Omi wearable.
//!
//! [`DeviceCoordinator`] owns the one logical BLE link: scanning for nearby
//! devices, the connect/disconnect lifecycle, battery and codec queries, and
//! the raw audio-byte subscription. It is written against the
//! [`core::bluetooth::DeviceSdk`] capability surface, implemented for real
//! hardware by [`core::bluetooth::OmiConnection`] over `bluest` and by a
//! scripted double in [`core::bluetooth::mock`] for tests.

// Module declarations
pub mod config;
pub mod core;
pub mod state;

pub use config::CoordinatorConfig;
pub use core::bluetooth::{
    AudioCodec, ConnectionPhase, DeviceCoordinator, DeviceEvent, DeviceSnapshot, DiscoveredDevice,
};
