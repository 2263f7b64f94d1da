//! Scripted test double for the device SDK capability surface.
//! Tests drive the coordinator by scripting results here and firing the
//! callbacks the coordinator registered (discoveries, phase changes, audio
//! chunks). Every SDK call is recorded so tests can assert on what was, or
//! was not, invoked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::bluetooth::sdk::{
    AudioBytesCallback, AudioSubscription, DeviceSdk, DeviceSdkProvider, DiscoverCallback,
    ScanHandle, SdkError, StateChangeCallback,
};
use crate::core::bluetooth::types::{AudioCodec, ConnectionPhase, DiscoveredDevice};

/// Scripted behavior of [`MockSdk::connect`].
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    /// Fire a `Connected` state change, then resolve `true`.
    Succeed,
    /// Resolve `true` without firing any state change.
    SucceedSilently,
    /// Resolve `false`.
    Refuse,
    /// Reject with the given message.
    Reject(String),
}

#[derive(Default)]
struct Callbacks {
    discover: Option<DiscoverCallback>,
    state_change: Option<StateChangeCallback>,
    audio: Option<AudioBytesCallback>,
}

struct Script {
    connect_behavior: ConnectBehavior,
    connect_delay: Option<Duration>,
    battery: Result<Option<u8>, String>,
    codec: Result<Option<AudioCodec>, String>,
    audio_start: Result<bool, String>,
    audio_stop: Result<(), String>,
    disconnect: Result<(), String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_behavior: ConnectBehavior::Succeed,
            connect_delay: None,
            battery: Ok(Some(90)),
            codec: Ok(Some(AudioCodec::Opus)),
            audio_start: Ok(true),
            audio_stop: Ok(()),
            disconnect: Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MockSdk {
    calls: Mutex<Vec<&'static str>>,
    callbacks: Mutex<Callbacks>,
    script: Mutex<Script>,
    connected: Mutex<bool>,
}

impl MockSdk {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // -- scripting --------------------------------------------------------

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.script.lock().unwrap().connect_behavior = behavior;
    }

    /// Delay applied inside `connect` before it settles; combined with a
    /// paused runtime this lets tests observe the in-flight flag.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.script.lock().unwrap().connect_delay = Some(delay);
    }

    pub fn set_battery(&self, result: Result<Option<u8>, &str>) {
        self.script.lock().unwrap().battery = result.map_err(str::to_owned);
    }

    pub fn set_codec(&self, result: Result<Option<AudioCodec>, &str>) {
        self.script.lock().unwrap().codec = result.map_err(str::to_owned);
    }

    /// `Ok(true)` hands out a subscription, `Ok(false)` resolves with none.
    pub fn set_audio_start(&self, result: Result<bool, &str>) {
        self.script.lock().unwrap().audio_start = result.map_err(str::to_owned);
    }

    pub fn set_audio_stop(&self, result: Result<(), &str>) {
        self.script.lock().unwrap().audio_stop = result.map_err(str::to_owned);
    }

    pub fn set_disconnect(&self, result: Result<(), &str>) {
        self.script.lock().unwrap().disconnect = result.map_err(str::to_owned);
    }

    // -- driving the registered callbacks ---------------------------------

    /// Fires a discovery event at the coordinator's scan callback.
    pub fn emit_discovery(&self, device: DiscoveredDevice) {
        let discover = self
            .callbacks
            .lock()
            .unwrap()
            .discover
            .clone()
            .expect("no scan in progress");
        discover(device);
    }

    /// Fires a connection phase change at the coordinator's state callback.
    pub fn emit_phase(&self, device_id: &str, phase: ConnectionPhase) {
        if phase == ConnectionPhase::Disconnected {
            *self.connected.lock().unwrap() = false;
        }
        let state_change = self
            .callbacks
            .lock()
            .unwrap()
            .state_change
            .clone()
            .expect("no connect was issued");
        state_change(device_id.to_string(), phase);
    }

    /// Delivers an audio chunk to the registered audio callback.
    pub fn emit_audio(&self, bytes: Vec<u8>) {
        let audio = self
            .callbacks
            .lock()
            .unwrap()
            .audio
            .clone()
            .expect("no audio listener registered");
        audio(bytes);
    }

    // -- call recording ---------------------------------------------------

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| **call == name)
            .count()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

#[async_trait::async_trait]
impl DeviceSdk for MockSdk {
    async fn scan_for_devices(
        &self,
        on_discover: DiscoverCallback,
        _timeout: Duration,
    ) -> Result<ScanHandle, SdkError> {
        self.record("scan");
        self.callbacks.lock().unwrap().discover = Some(on_discover);
        Ok(ScanHandle::new())
    }

    async fn connect(
        &self,
        device_id: &str,
        on_state_change: StateChangeCallback,
    ) -> Result<bool, SdkError> {
        self.record("connect");
        self.callbacks.lock().unwrap().state_change = Some(on_state_change.clone());
        let delay = self.script.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.script.lock().unwrap().connect_behavior.clone();
        match behavior {
            ConnectBehavior::Succeed => {
                *self.connected.lock().unwrap() = true;
                on_state_change(device_id.to_string(), ConnectionPhase::Connected);
                Ok(true)
            }
            ConnectBehavior::SucceedSilently => {
                *self.connected.lock().unwrap() = true;
                Ok(true)
            }
            ConnectBehavior::Refuse => Ok(false),
            ConnectBehavior::Reject(message) => Err(SdkError::ConnectionFailed(message)),
        }
    }

    async fn disconnect(&self) -> Result<(), SdkError> {
        self.record("disconnect");
        *self.connected.lock().unwrap() = false;
        self.script
            .lock()
            .unwrap()
            .disconnect
            .clone()
            .map_err(SdkError::Other)
    }

    async fn is_connected(&self) -> bool {
        self.record("is_connected");
        *self.connected.lock().unwrap()
    }

    async fn battery_level(&self) -> Result<Option<u8>, SdkError> {
        self.record("battery");
        self.script
            .lock()
            .unwrap()
            .battery
            .clone()
            .map_err(SdkError::Other)
    }

    async fn audio_codec(&self) -> Result<Option<AudioCodec>, SdkError> {
        self.record("codec");
        self.script
            .lock()
            .unwrap()
            .codec
            .clone()
            .map_err(SdkError::Other)
    }

    async fn start_audio_bytes_listener(
        &self,
        on_bytes: AudioBytesCallback,
    ) -> Result<Option<AudioSubscription>, SdkError> {
        self.record("audio_start");
        let script = self.script.lock().unwrap().audio_start.clone();
        match script {
            Ok(true) => {
                self.callbacks.lock().unwrap().audio = Some(on_bytes);
                Ok(Some(AudioSubscription::new()))
            }
            Ok(false) => Ok(None),
            Err(message) => Err(SdkError::Other(message)),
        }
    }

    async fn stop_audio_bytes_listener(&self, handle: AudioSubscription) -> Result<(), SdkError> {
        self.record("audio_stop");
        handle.stop();
        self.callbacks.lock().unwrap().audio = None;
        self.script
            .lock()
            .unwrap()
            .audio_stop
            .clone()
            .map_err(SdkError::Other)
    }
}

/// Provider double; counts acquisitions so tests can verify the lazy,
/// sticky capability handling.
pub struct MockProvider {
    sdk: Option<Arc<MockSdk>>,
    acquisitions: AtomicUsize,
}

impl MockProvider {
    pub fn available(sdk: Arc<MockSdk>) -> Self {
        Self {
            sdk: Some(sdk),
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            sdk: None,
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn acquire_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DeviceSdkProvider for MockProvider {
    async fn acquire(&self) -> Result<Arc<dyn DeviceSdk>, SdkError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        match &self.sdk {
            Some(sdk) => Ok(sdk.clone() as Arc<dyn DeviceSdk>),
            None => Err(SdkError::AdapterUnavailable),
        }
    }
}
