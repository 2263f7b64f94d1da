//! Device connection coordinator for the Omi wearable.
//! Single source of truth for discovery, connection lifecycle and audio
//! streaming. Translates the SDK's callback-driven interface into idempotent
//! operations and a consistent state snapshot; none of the public operations
//! return an error, failures land in the snapshot's `error` field instead.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::config::CoordinatorConfig;
use crate::core::bluetooth::constants::{BLE_UNAVAILABLE_MESSAGE, CONNECTION_FAILED_MESSAGE};
use crate::core::bluetooth::events::DeviceEvent;
use crate::core::bluetooth::sdk::{
    AudioBytesCallback, AudioSubscription, DeviceSdk, DeviceSdkProvider, DiscoverCallback,
    ScanHandle, StateChangeCallback,
};
use crate::core::bluetooth::types::{AudioCodec, ConnectionPhase, DeviceSnapshot, DiscoveredDevice};

/// Tagged connection state. Battery and codec live inside `Connected` so a
/// device id, battery figure or codec can never outlive the link.
#[derive(Debug, Clone)]
enum LinkState {
    Disconnected,
    Connecting,
    Connected {
        device_id: String,
        device_name: Option<String>,
        battery_level: Option<u8>,
        audio_codec: Option<AudioCodec>,
    },
}

struct CoordinatorState {
    devices: Vec<DiscoveredDevice>,
    is_scanning: bool,
    /// Incremented per scan so a superseded scan's timer cannot touch the
    /// flags of a newer one.
    scan_generation: u64,
    scan_handle: Option<ScanHandle>,
    link: LinkState,
    audio: Option<AudioSubscription>,
    is_connecting: bool,
    error: Option<String>,
    ble_unavailable: bool,
    sdk: Option<Arc<dyn DeviceSdk>>,
}

/// State and event channel shared with SDK callbacks and watcher tasks.
struct Shared {
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap()
    }

    fn emit(&self, event: DeviceEvent) {
        debug!("Device event: {event:?}");
        let _ = self.events.send(event);
    }

    /// Applies a phase change reported by the SDK's state-change callback.
    fn apply_phase(&self, device_id: String, device_name: Option<String>, phase: ConnectionPhase) {
        match phase {
            ConnectionPhase::Connected => {
                let was_scanning = {
                    let mut state = self.lock();
                    state.link = LinkState::Connected {
                        device_id,
                        device_name,
                        battery_level: None,
                        audio_codec: None,
                    };
                    // Candidates are no longer needed once a link is up.
                    state.devices.clear();
                    if let Some(handle) = state.scan_handle.take() {
                        handle.stop();
                    }
                    let was_scanning = state.is_scanning;
                    state.is_scanning = false;
                    was_scanning
                };
                if was_scanning {
                    self.emit(DeviceEvent::ScanCompleted);
                }
                self.emit(DeviceEvent::PhaseChanged(ConnectionPhase::Connected));
            }
            ConnectionPhase::Connecting => {
                self.lock().link = LinkState::Connecting;
                self.emit(DeviceEvent::PhaseChanged(ConnectionPhase::Connecting));
            }
            ConnectionPhase::Disconnected => self.drop_link(),
        }
    }

    /// Moves the link to `Disconnected` and forgets the audio subscription in
    /// the same mutation, whatever triggered the transition. SDK teardown of a
    /// still-live subscription happens asynchronously, best-effort.
    fn drop_link(&self) {
        let (phase_changed, audio, sdk) = {
            let mut state = self.lock();
            if matches!(state.link, LinkState::Disconnected) && state.audio.is_none() {
                return;
            }
            let phase_changed = !matches!(state.link, LinkState::Disconnected);
            state.link = LinkState::Disconnected;
            (phase_changed, state.audio.take(), state.sdk.clone())
        };
        if let Some(subscription) = audio {
            subscription.stop();
            self.emit(DeviceEvent::AudioStreamStopped);
            if let Some(sdk) = sdk {
                tokio::spawn(async move {
                    if let Err(e) = sdk.stop_audio_bytes_listener(subscription).await {
                        warn!("Audio listener teardown after disconnect failed: {e}");
                    }
                });
            }
        }
        if phase_changed {
            info!("Device disconnected");
            self.emit(DeviceEvent::PhaseChanged(ConnectionPhase::Disconnected));
        }
    }

    fn store_error(&self, message: String) {
        self.lock().error = Some(message.clone());
        self.emit(DeviceEvent::ErrorOccurred(message));
    }
}

fn merge_device(devices: &mut Vec<DiscoveredDevice>, device: DiscoveredDevice) {
    match devices.iter_mut().find(|d| d.id == device.id) {
        Some(existing) => *existing = device,
        None => devices.push(device),
    }
}

/// Owns the one logical device connection for the whole application.
///
/// Construct once at process start (see `AppState`) and share by reference;
/// all operations take `&self` and may be called from any task.
pub struct DeviceCoordinator {
    provider: Arc<dyn DeviceSdkProvider>,
    config: CoordinatorConfig,
    shared: Arc<Shared>,
}

impl DeviceCoordinator {
    /// Creates a new coordinator. The BLE capability itself is acquired
    /// lazily on the first operation that needs it.
    pub fn new(provider: Arc<dyn DeviceSdkProvider>, config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(CoordinatorState {
                devices: Vec::new(),
                is_scanning: false,
                scan_generation: 0,
                scan_handle: None,
                link: LinkState::Disconnected,
                audio: None,
                is_connecting: false,
                error: None,
                ble_unavailable: false,
                sdk: None,
            }),
            events,
        });
        Self {
            provider,
            config,
            shared,
        }
    }

    /// Subscribes to the coordinator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    /// Returns a copy of the current UI-facing state.
    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = self.shared.lock();
        let (
            connection_phase,
            connected_device_id,
            connected_device_name,
            battery_level,
            audio_codec,
        ) = match &state.link {
                LinkState::Disconnected => (ConnectionPhase::Disconnected, None, None, None, None),
                LinkState::Connecting => (ConnectionPhase::Connecting, None, None, None, None),
                LinkState::Connected {
                    device_id,
                    device_name,
                    battery_level,
                    audio_codec,
                } => (
                    ConnectionPhase::Connected,
                    Some(device_id.clone()),
                    device_name.clone(),
                    *battery_level,
                    *audio_codec,
                ),
            };
        DeviceSnapshot {
            devices: state.devices.clone(),
            is_scanning: state.is_scanning,
            connection_phase,
            connected_device_id,
            connected_device_name,
            battery_level,
            audio_codec,
            is_streaming_audio: state.audio.is_some(),
            is_connecting: state.is_connecting,
            error: state.error.clone(),
            ble_unavailable: state.ble_unavailable,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.shared.lock().link, LinkState::Connected { .. })
    }

    /// Clears the stored error message.
    pub fn clear_error(&self) {
        self.shared.lock().error = None;
    }

    /// Returns the SDK handle, acquiring it on first use. A failed
    /// acquisition marks BLE unavailable for the coordinator's lifetime.
    async fn sdk(&self) -> Option<Arc<dyn DeviceSdk>> {
        {
            let state = self.shared.lock();
            if let Some(sdk) = &state.sdk {
                return Some(sdk.clone());
            }
            if state.ble_unavailable {
                return None;
            }
        }
        match self.provider.acquire().await {
            Ok(sdk) => {
                info!("BLE capability acquired");
                self.shared.lock().sdk = Some(sdk.clone());
                Some(sdk)
            }
            Err(e) => {
                warn!("BLE capability unavailable: {e}");
                self.shared.lock().ble_unavailable = true;
                None
            }
        }
    }

    /// Starts a scan for nearby Omi devices. Returns a handle that stops the
    /// scan early, or `None` when no scan was started (BLE unavailable, or a
    /// device is already connected).
    ///
    /// The scan stops itself after the configured window; the accumulated
    /// device list survives the timeout so the UI can still show what was
    /// found.
    pub async fn start_scan(&self) -> Option<ScanHandle> {
        {
            let mut state = self.shared.lock();
            state.error = None;
            state.devices.clear();
        }
        let Some(sdk) = self.sdk().await else {
            self.shared.store_error(BLE_UNAVAILABLE_MESSAGE.to_string());
            return None;
        };
        {
            let state = self.shared.lock();
            if matches!(state.link, LinkState::Connected { .. }) {
                debug!("Scan request ignored: a device is already connected");
                return None;
            }
        }
        // A restart supersedes any scan still in flight.
        self.stop_scan();

        let generation = {
            let mut state = self.shared.lock();
            state.scan_generation += 1;
            state.is_scanning = true;
            state.scan_generation
        };

        let shared = self.shared.clone();
        let on_discover: DiscoverCallback = Arc::new(move |device: DiscoveredDevice| {
            let mut state = shared.lock();
            if state.scan_generation != generation || !state.is_scanning {
                return;
            }
            merge_device(&mut state.devices, device.clone());
            drop(state);
            shared.emit(DeviceEvent::DeviceFound(device));
        });

        let timeout = self.config.scan_timeout;
        let handle = match sdk.scan_for_devices(on_discover, timeout).await {
            Ok(handle) => handle,
            Err(e) => {
                {
                    let mut state = self.shared.lock();
                    if state.scan_generation == generation {
                        state.is_scanning = false;
                    }
                }
                self.shared.store_error(e.to_string());
                return None;
            }
        };
        {
            let mut state = self.shared.lock();
            state.scan_handle = Some(handle.clone());
        }
        self.shared.emit(DeviceEvent::ScanStarted);
        info!("Device scan started ({} ms window)", timeout.as_millis());

        // The timeout is the coordinator's own; it settles the UI flag even
        // if the SDK keeps its stream open longer.
        let shared = self.shared.clone();
        let scan_handle = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = scan_handle.stopped() => {}
            }
            let was_scanning = {
                let mut state = shared.lock();
                if state.scan_generation != generation {
                    return;
                }
                let was_scanning = state.is_scanning;
                state.is_scanning = false;
                if let Some(handle) = state.scan_handle.take() {
                    handle.stop();
                }
                was_scanning
            };
            if was_scanning {
                info!("Scan window elapsed");
                shared.emit(DeviceEvent::ScanCompleted);
            }
        });

        Some(handle)
    }

    /// Stops an in-flight scan. No-op if not scanning.
    pub fn stop_scan(&self) {
        let was_scanning = {
            let mut state = self.shared.lock();
            let was_scanning = state.is_scanning;
            state.is_scanning = false;
            if let Some(handle) = state.scan_handle.take() {
                handle.stop();
            }
            was_scanning
        };
        if was_scanning {
            info!("Scan stopped");
            self.shared.emit(DeviceEvent::ScanCompleted);
        }
    }

    /// Connects to the device with the given ID.
    ///
    /// No-op while already connected or while another connect is in flight
    /// (single-flight). The phase is driven by the SDK's state-change
    /// callback; on success, battery and codec are fetched best-effort. Any
    /// failure leaves the phase `Disconnected` with the message stored in
    /// `error`, and `is_connecting` is cleared on every exit path.
    pub async fn connect(&self, device_id: &str, device_name: Option<&str>) {
        {
            let mut state = self.shared.lock();
            if state.is_connecting {
                info!("Connect request ignored: another connect is in flight");
                return;
            }
            if matches!(state.link, LinkState::Connected { .. }) {
                info!("Connect request ignored: a device is already connected");
                return;
            }
            state.error = None;
            state.is_connecting = true;
            state.link = LinkState::Connecting;
        }
        self.shared.emit(DeviceEvent::PhaseChanged(ConnectionPhase::Connecting));

        let Some(sdk) = self.sdk().await else {
            self.shared.store_error(BLE_UNAVAILABLE_MESSAGE.to_string());
            self.shared.drop_link();
            self.shared.lock().is_connecting = false;
            return;
        };

        let shared = self.shared.clone();
        let name = device_name.map(str::to_owned);
        let on_state_change: StateChangeCallback =
            Arc::new(move |id: String, phase: ConnectionPhase| {
                shared.apply_phase(id, name.clone(), phase);
            });

        info!("Connecting to device {device_id}...");
        match sdk.connect(device_id, on_state_change).await {
            Ok(true) => {
                // Best-effort: a failed query leaves the field absent rather
                // than failing the connect.
                let (battery, codec) = tokio::join!(sdk.battery_level(), sdk.audio_codec());
                let battery = battery.unwrap_or_else(|e| {
                    warn!("Battery query failed: {e}");
                    None
                });
                let codec = codec.unwrap_or_else(|e| {
                    warn!("Codec query failed: {e}");
                    None
                });
                let applied = {
                    let mut state = self.shared.lock();
                    if let LinkState::Connected {
                        battery_level,
                        audio_codec,
                        ..
                    } = &mut state.link
                    {
                        *battery_level = battery;
                        *audio_codec = codec;
                        true
                    } else {
                        false
                    }
                };
                if applied {
                    self.shared.emit(DeviceEvent::BatteryUpdated(battery));
                    self.shared.emit(DeviceEvent::CodecUpdated(codec));
                }
            }
            Ok(false) => {
                warn!("SDK refused connection to {device_id}");
                self.shared.store_error(CONNECTION_FAILED_MESSAGE.to_string());
                self.shared.drop_link();
            }
            Err(e) => {
                warn!("Connect to {device_id} failed: {e}");
                self.shared.store_error(e.to_string());
                self.shared.drop_link();
            }
        }
        // Reached on every path once the flag was raised.
        self.shared.lock().is_connecting = false;
    }

    /// Disconnects from the current device, tearing down the audio
    /// subscription first. A failed teardown or disconnect stores its
    /// message, but the connection fields are cleared regardless, so stale
    /// connected-looking state never survives.
    pub async fn disconnect(&self) {
        let sdk = {
            let mut state = self.shared.lock();
            state.error = None;
            match &state.sdk {
                Some(sdk) => sdk.clone(),
                // Nothing was ever connected.
                None => return,
            }
        };
        let audio = self.shared.lock().audio.take();
        if let Some(subscription) = audio {
            subscription.stop();
            self.shared.emit(DeviceEvent::AudioStreamStopped);
            if let Err(e) = sdk.stop_audio_bytes_listener(subscription).await {
                warn!("Audio listener teardown failed: {e}");
                self.shared.store_error(e.to_string());
            }
        }
        if let Err(e) = sdk.disconnect().await {
            self.shared.store_error(e.to_string());
        }
        self.shared.drop_link();
    }

    /// Subscribes to the device's raw audio-byte stream, delivering each
    /// chunk to `on_bytes`. No-op unless connected, and idempotent while a
    /// subscription exists. Failure is logged, not surfaced: live audio is a
    /// best-effort enhancement.
    pub async fn start_audio_listener(&self, on_bytes: AudioBytesCallback) {
        let sdk = {
            let state = self.shared.lock();
            if !matches!(state.link, LinkState::Connected { .. }) {
                debug!("Audio listener request ignored: not connected");
                return;
            }
            if state.audio.is_some() {
                debug!("Audio listener request ignored: already streaming");
                return;
            }
            match &state.sdk {
                Some(sdk) => sdk.clone(),
                None => return,
            }
        };
        match sdk.start_audio_bytes_listener(on_bytes).await {
            Ok(Some(subscription)) => {
                let raced = {
                    let mut state = self.shared.lock();
                    if matches!(state.link, LinkState::Connected { .. }) && state.audio.is_none() {
                        state.audio = Some(subscription);
                        None
                    } else {
                        Some(subscription)
                    }
                };
                match raced {
                    None => {
                        info!("Audio streaming started");
                        self.shared.emit(DeviceEvent::AudioStreamStarted);
                    }
                    Some(subscription) => {
                        // The link dropped while we were subscribing.
                        subscription.stop();
                        if let Err(e) = sdk.stop_audio_bytes_listener(subscription).await {
                            warn!("Audio listener teardown failed: {e}");
                        }
                    }
                }
            }
            Ok(None) => warn!("Audio listener not started: SDK returned no subscription"),
            Err(e) => warn!("Audio listener start failed: {e}"),
        }
    }

    /// Tears down the audio subscription. No-op if none exists. The local
    /// handle and streaming flag are cleared before the SDK call, so a failed
    /// teardown cannot leave the UI stuck showing "streaming".
    pub async fn stop_audio_listener(&self) {
        let (sdk, subscription) = {
            let mut state = self.shared.lock();
            (state.sdk.clone(), state.audio.take())
        };
        let Some(subscription) = subscription else {
            return;
        };
        subscription.stop();
        self.shared.emit(DeviceEvent::AudioStreamStopped);
        if let Some(sdk) = sdk {
            if let Err(e) = sdk.stop_audio_bytes_listener(subscription).await {
                warn!("Audio listener teardown failed: {e}");
            }
        }
        info!("Audio streaming stopped");
    }

    /// Re-queries the battery level. No-op unless connected; a failed query
    /// clears the stored value rather than leaving a stale figure.
    pub async fn refresh_battery(&self) {
        let sdk = {
            let state = self.shared.lock();
            if !matches!(state.link, LinkState::Connected { .. }) {
                return;
            }
            match &state.sdk {
                Some(sdk) => sdk.clone(),
                None => return,
            }
        };
        let level = match sdk.battery_level().await {
            Ok(level) => level,
            Err(e) => {
                warn!("Battery query failed: {e}");
                None
            }
        };
        let applied = {
            let mut state = self.shared.lock();
            if let LinkState::Connected { battery_level, .. } = &mut state.link {
                *battery_level = level;
                true
            } else {
                false
            }
        };
        if applied {
            self.shared.emit(DeviceEvent::BatteryUpdated(level));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, rssi: i16) -> DiscoveredDevice {
        DiscoveredDevice::new(id.to_string(), format!("Omi-{id}"), rssi)
    }

    #[test]
    fn merge_replaces_by_id_and_keeps_order() {
        let mut devices = Vec::new();
        merge_device(&mut devices, device("AA", -40));
        merge_device(&mut devices, device("BB", -50));
        merge_device(&mut devices, device("AA", -35));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "AA");
        assert_eq!(devices[0].rssi, -35);
        assert_eq!(devices[1].id, "BB");
    }
}
