//! Advertisement scanning for the Omi wearable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};

use crate::core::bluetooth::constants::{OMI_NAME_PREFIX, UUID_OMI_SERVICE};
use crate::core::bluetooth::sdk::{DiscoverCallback, ScanHandle, SdkError};
use crate::core::bluetooth::types::DiscoveredDevice;

/// Registry of platform device handles keyed by their string id, so a later
/// `connect(device_id)` can resolve the handle the scan discovered.
pub(crate) type DeviceRegistry = Arc<Mutex<HashMap<String, Device>>>;

pub(crate) struct OmiScanner {
    adapter: Adapter,
    registry: DeviceRegistry,
}

impl OmiScanner {
    pub(crate) fn new(adapter: Adapter, registry: DeviceRegistry) -> Self {
        Self { adapter, registry }
    }

    /// Spawns a scan task that reports Omi devices through `on_discover`
    /// until the timeout elapses or the returned handle is stopped.
    pub(crate) async fn start(
        &self,
        on_discover: DiscoverCallback,
        timeout: Duration,
    ) -> Result<ScanHandle, SdkError> {
        let handle = ScanHandle::new();
        let adapter = self.adapter.clone();
        let registry = self.registry.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) =
                Self::scan_task(adapter, registry, on_discover, timeout, task_handle).await
            {
                error!("Scan task failed: {e}");
            }
        });
        info!("Device scan task started.");
        Ok(handle)
    }

    async fn scan_task(
        adapter: Adapter,
        registry: DeviceRegistry,
        on_discover: DiscoverCallback,
        timeout: Duration,
        handle: ScanHandle,
    ) -> Result<(), SdkError> {
        // Devices the platform already holds a link to come first.
        info!("Checking for connected devices");
        for device in adapter.connected_devices().await? {
            if Self::is_omi_name(device.name().ok().as_deref()) {
                Self::report(&registry, &on_discover, &device, None).await;
            }
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&[]).await?;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let device = discovered.device;
                            let rssi = discovered.rssi;
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device, rssi);
                            let advertised_omi =
                                discovered.adv_data.services.contains(&UUID_OMI_SERVICE);
                            let name = discovered
                                .adv_data
                                .local_name
                                .clone()
                                .or_else(|| device.name().ok());
                            if advertised_omi || Self::is_omi_name(name.as_deref()) {
                                Self::report(&registry, &on_discover, &device, rssi).await;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = &mut deadline => {
                    info!("Scan window elapsed.");
                    break;
                }
                _ = handle.stopped() => {
                    info!("Scan cancelled.");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Records the device in the registry and reports it to the coordinator.
    async fn report(
        registry: &DeviceRegistry,
        on_discover: &DiscoverCallback,
        device: &Device,
        rssi: Option<i16>,
    ) {
        let id = device.id().to_string();
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let rssi = match rssi {
            Some(rssi) => rssi,
            None => device.rssi().await.unwrap_or(0),
        };
        info!("Found Omi device - ID: {id}, Name: {name}, RSSI: {rssi}");

        registry.lock().unwrap().insert(id.clone(), device.clone());
        on_discover(DiscoveredDevice::new(id, name, rssi));
    }

    fn is_omi_name(name: Option<&str>) -> bool {
        name.map(|name| name.starts_with(OMI_NAME_PREFIX))
            .unwrap_or(false)
    }
}
