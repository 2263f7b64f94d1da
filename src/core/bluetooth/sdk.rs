//! The device SDK capability surface the coordinator is written against.
//! The real `bluest`-backed implementation lives in `connection.rs`; the
//! scripted test double lives in `mock.rs`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::types::{AudioCodec, ConnectionPhase, DiscoveredDevice};

/// Per-device callback invoked for each discovery event during a scan.
pub type DiscoverCallback = Arc<dyn Fn(DiscoveredDevice) + Send + Sync>;

/// Callback invoked when the SDK observes a connection phase change.
pub type StateChangeCallback = Arc<dyn Fn(String, ConnectionPhase) + Send + Sync>;

/// Callback invoked with each raw audio-byte chunk from the device.
pub type AudioBytesCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Errors from the SDK capability surface
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    #[error("Device not found with ID: {0}")]
    DeviceNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Device is not connected")]
    NotConnected,

    #[error("{0}")]
    ConnectionFailed(String),

    #[error(transparent)]
    Ble(#[from] bluest::Error),

    #[error("{0}")]
    Other(String),
}

/// Handle to an in-flight scan. Stopping is idempotent.
#[derive(Debug, Clone, Default)]
pub struct ScanHandle {
    token: CancellationToken,
}

impl ScanHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the scan early.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the scan has been stopped.
    pub(crate) async fn stopped(&self) {
        self.token.cancelled().await;
    }
}

/// Handle to an active raw-audio subscription. At most one exists at a time.
#[derive(Debug, Default)]
pub struct AudioSubscription {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AudioSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_task(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            token,
            task: Some(task),
        }
    }

    /// Signals the forwarding task to stop. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the subscription and waits for its forwarding task to finish.
    pub(crate) async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::warn!("Audio forwarding task failed: {e}");
                }
            }
        }
    }
}

/// Capability surface of the BLE device SDK.
///
/// The coordinator only ever talks to this trait, so the real device and a
/// test double are interchangeable.
#[async_trait::async_trait]
pub trait DeviceSdk: Send + Sync {
    /// Starts scanning for devices, invoking `on_discover` for each one found
    /// within the timeout window.
    async fn scan_for_devices(
        &self,
        on_discover: DiscoverCallback,
        timeout: Duration,
    ) -> Result<ScanHandle, SdkError>;

    /// Connects to the device with the given ID. Resolves `true` on success;
    /// phase changes (including later SDK-originated disconnects) are
    /// reported through `on_state_change`.
    async fn connect(
        &self,
        device_id: &str,
        on_state_change: StateChangeCallback,
    ) -> Result<bool, SdkError>;

    /// Severs the current connection, if any.
    async fn disconnect(&self) -> Result<(), SdkError>;

    /// Whether the SDK currently holds a live connection.
    async fn is_connected(&self) -> bool;

    /// Battery percentage of the connected device.
    async fn battery_level(&self) -> Result<Option<u8>, SdkError>;

    /// Audio codec the connected device streams with.
    async fn audio_codec(&self) -> Result<Option<AudioCodec>, SdkError>;

    /// Subscribes to the raw audio-byte stream.
    async fn start_audio_bytes_listener(
        &self,
        on_bytes: AudioBytesCallback,
    ) -> Result<Option<AudioSubscription>, SdkError>;

    /// Tears down an audio subscription.
    async fn stop_audio_bytes_listener(&self, handle: AudioSubscription) -> Result<(), SdkError>;
}

/// Lazy acquisition of the SDK capability. Invoked at most once per
/// coordinator lifetime; a failure marks BLE as unavailable for good.
#[async_trait::async_trait]
pub trait DeviceSdkProvider: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn DeviceSdk>, SdkError>;
}
