//! `bluest`-backed implementation of the device SDK capability surface.
//! This module handles connecting to and disconnecting from the Omi wearable
//! and reading its GATT characteristics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{info, warn};

use crate::core::bluetooth::audio;
use crate::core::bluetooth::constants::{
    UUID_AUDIO_BYTES_CHAR, UUID_AUDIO_CODEC_CHAR, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE,
    UUID_OMI_SERVICE,
};
use crate::core::bluetooth::scanner::{DeviceRegistry, OmiScanner};
use crate::core::bluetooth::sdk::{
    AudioBytesCallback, AudioSubscription, DeviceSdk, DeviceSdkProvider, DiscoverCallback,
    ScanHandle, SdkError, StateChangeCallback,
};
use crate::core::bluetooth::types::{AudioCodec, ConnectionPhase};

/// GATT handles held while a device is connected.
struct ConnectedGatt {
    device: Device,
    audio_characteristic: Characteristic,
    codec_characteristic: Option<Characteristic>,
    battery_characteristic: Option<Characteristic>,
}

/// The real device SDK, backed by the platform Bluetooth stack.
pub struct OmiConnection {
    adapter: Adapter,
    registry: DeviceRegistry,
    scanner: OmiScanner,
    connected: Mutex<Option<ConnectedGatt>>,
}

impl OmiConnection {
    pub async fn new() -> Result<Self, SdkError> {
        let adapter = Adapter::default()
            .await
            .ok_or(SdkError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        let registry: DeviceRegistry = Arc::new(Mutex::new(HashMap::new()));
        let scanner = OmiScanner::new(adapter.clone(), registry.clone());
        Ok(Self {
            adapter,
            registry,
            scanner,
            connected: Mutex::new(None),
        })
    }

    /// Resolves a device id to the handle the scan registered, falling back
    /// to devices the platform already knows about.
    async fn resolve_device(&self, device_id: &str) -> Result<Device, SdkError> {
        if let Some(device) = self.registry.lock().unwrap().get(device_id).cloned() {
            return Ok(device);
        }
        let connected = self.adapter.connected_devices().await?;
        connected
            .into_iter()
            .find(|device| device.id().to_string() == device_id)
            .ok_or_else(|| SdkError::DeviceNotFound(device_id.to_string()))
    }

    async fn discover_gatt(&self, device: &Device) -> Result<ConnectedGatt, SdkError> {
        info!("Connection successful, discovering services...");
        let services = device.services().await?;
        let omi_service = services
            .iter()
            .find(|service| service.uuid() == UUID_OMI_SERVICE)
            .ok_or_else(|| {
                for service in &services {
                    info!("Available service: {}", service.uuid());
                }
                SdkError::ServiceNotFound(UUID_OMI_SERVICE)
            })?
            .clone();
        info!("Found Omi service: {}", omi_service.uuid());

        let mut audio_characteristic = None;
        let mut codec_characteristic = None;
        for characteristic in omi_service.characteristics().await? {
            let uuid = characteristic.uuid();
            if uuid == UUID_AUDIO_BYTES_CHAR {
                info!("Found audio bytes characteristic: {uuid}");
                audio_characteristic = Some(characteristic);
            } else if uuid == UUID_AUDIO_CODEC_CHAR {
                info!("Found audio codec characteristic: {uuid}");
                codec_characteristic = Some(characteristic);
            }
        }
        let audio_characteristic = audio_characteristic
            .ok_or(SdkError::CharacteristicNotFound(UUID_AUDIO_BYTES_CHAR))?;
        if codec_characteristic.is_none() {
            info!("No codec characteristic; the device streams its default codec");
        }

        let battery_characteristic = match services
            .iter()
            .find(|service| service.uuid() == UUID_BATTERY_SERVICE)
        {
            Some(service) => service
                .characteristics()
                .await?
                .into_iter()
                .find(|characteristic| characteristic.uuid() == UUID_BATTERY_LEVEL),
            None => None,
        };
        if battery_characteristic.is_none() {
            info!("No battery service on this device");
        }

        Ok(ConnectedGatt {
            device: device.clone(),
            audio_characteristic,
            codec_characteristic,
            battery_characteristic,
        })
    }

    /// Watches platform connection events and forwards SDK-originated
    /// disconnects to the coordinator's state-change callback.
    fn watch_disconnect(&self, device: Device, on_state_change: StateChangeCallback) {
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            let id = device.id().to_string();
            match adapter.device_connection_events(&device).await {
                Ok(mut events) => {
                    while let Some(event) = events.next().await {
                        if matches!(event, ConnectionEvent::Disconnected) {
                            info!("Device {id} reported disconnect");
                            on_state_change(id.clone(), ConnectionPhase::Disconnected);
                            break;
                        }
                    }
                }
                Err(e) => warn!("Connection event stream unavailable for {id}: {e}"),
            }
        });
    }
}

#[async_trait::async_trait]
impl DeviceSdk for OmiConnection {
    async fn scan_for_devices(
        &self,
        on_discover: DiscoverCallback,
        timeout: Duration,
    ) -> Result<ScanHandle, SdkError> {
        self.scanner.start(on_discover, timeout).await
    }

    async fn connect(
        &self,
        device_id: &str,
        on_state_change: StateChangeCallback,
    ) -> Result<bool, SdkError> {
        let device = self.resolve_device(device_id).await?;
        if !device.is_connected().await {
            info!("Initiating connection to {device_id}...");
            self.adapter.connect_device(&device).await?;
        }
        let gatt = self.discover_gatt(&device).await?;
        *self.connected.lock().unwrap() = Some(gatt);
        self.watch_disconnect(device.clone(), on_state_change.clone());
        on_state_change(device.id().to_string(), ConnectionPhase::Connected);
        info!("Connection and setup process completed successfully");
        Ok(true)
    }

    async fn disconnect(&self) -> Result<(), SdkError> {
        let device = self
            .connected
            .lock()
            .unwrap()
            .take()
            .map(|gatt| gatt.device);
        let Some(device) = device else {
            return Ok(());
        };
        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            self.adapter.disconnect_device(&device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let device = self
            .connected
            .lock()
            .unwrap()
            .as_ref()
            .map(|gatt| gatt.device.clone());
        match device {
            Some(device) => device.is_connected().await,
            None => false,
        }
    }

    async fn battery_level(&self) -> Result<Option<u8>, SdkError> {
        let characteristic = {
            let connected = self.connected.lock().unwrap();
            let gatt = connected.as_ref().ok_or(SdkError::NotConnected)?;
            gatt.battery_characteristic.clone()
        };
        let Some(characteristic) = characteristic else {
            return Ok(None);
        };
        let data = characteristic.read().await?;
        Ok(data.first().copied())
    }

    async fn audio_codec(&self) -> Result<Option<AudioCodec>, SdkError> {
        let characteristic = {
            let connected = self.connected.lock().unwrap();
            let gatt = connected.as_ref().ok_or(SdkError::NotConnected)?;
            gatt.codec_characteristic.clone()
        };
        // A device without the characteristic streams its default codec.
        let Some(characteristic) = characteristic else {
            return Ok(Some(AudioCodec::Pcm8));
        };
        let data = characteristic.read().await?;
        Ok(Some(
            data.first()
                .copied()
                .map(AudioCodec::from_id)
                .unwrap_or(AudioCodec::Pcm8),
        ))
    }

    async fn start_audio_bytes_listener(
        &self,
        on_bytes: AudioBytesCallback,
    ) -> Result<Option<AudioSubscription>, SdkError> {
        let characteristic = {
            let connected = self.connected.lock().unwrap();
            let gatt = connected.as_ref().ok_or(SdkError::NotConnected)?;
            gatt.audio_characteristic.clone()
        };
        audio::start_forwarding(characteristic, on_bytes)
            .await
            .map(Some)
    }

    async fn stop_audio_bytes_listener(&self, handle: AudioSubscription) -> Result<(), SdkError> {
        handle.shutdown().await;
        Ok(())
    }
}

/// Acquires the real SDK. Used by the composition root; failure (no adapter,
/// adapter never becomes available) makes the coordinator flag BLE as
/// unavailable.
pub struct OmiConnectionProvider;

#[async_trait::async_trait]
impl DeviceSdkProvider for OmiConnectionProvider {
    async fn acquire(&self) -> Result<Arc<dyn DeviceSdk>, SdkError> {
        Ok(Arc::new(OmiConnection::new().await?) as Arc<dyn DeviceSdk>)
    }
}
