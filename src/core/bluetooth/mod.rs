//! Bluetooth functionality for the Omi device bridge
//! This module owns device discovery, the connection lifecycle and the
//! raw audio-byte stream from the Omi wearable.

mod audio;
mod connection;
mod constants;
mod coordinator;
mod events;
pub mod mock;
mod scanner;
mod sdk;
mod types;

// Re-export types that should be publicly accessible
pub use connection::{OmiConnection, OmiConnectionProvider};
pub use constants::*; // Re-export all constants
pub use coordinator::DeviceCoordinator;
pub use events::DeviceEvent;
pub use sdk::{
    AudioBytesCallback, AudioSubscription, DeviceSdk, DeviceSdkProvider, DiscoverCallback,
    ScanHandle, SdkError, StateChangeCallback,
};
pub use types::{AudioCodec, ConnectionPhase, DeviceSnapshot, DiscoveredDevice};
