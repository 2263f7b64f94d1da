//! Console bridge for the Omi wearable: scans, connects to the first Omi
//! device found (or `OMI_DEVICE_ID` from the environment), streams audio
//! bytes, and disconnects on ctrl-c. This binary stands in for the UI layer;
//! everything it does goes through the coordinator's public surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use log::info;

use omi_device_bridge::config::CoordinatorConfig;
use omi_device_bridge::core::bluetooth::{AudioBytesCallback, DeviceEvent};
use omi_device_bridge::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_state = AppState::new(CoordinatorConfig::default());
    let coordinator = app_state.coordinator();
    let mut events = coordinator.subscribe();

    let (device_id, device_name) = match std::env::var("OMI_DEVICE_ID") {
        Ok(id) => (id, None),
        Err(_) => {
            info!("Scanning for Omi devices...");
            coordinator.start_scan().await;
            let mut found = None;
            while let Ok(event) = events.recv().await {
                match event {
                    DeviceEvent::DeviceFound(device) => {
                        info!(
                            "Found {} ({}), RSSI {}",
                            device.name, device.id, device.rssi
                        );
                        found = Some((device.id, Some(device.name)));
                        break;
                    }
                    DeviceEvent::ScanCompleted => break,
                    _ => {}
                }
            }
            coordinator.stop_scan();
            match found {
                Some(found) => found,
                None => {
                    let snapshot = coordinator.snapshot();
                    bail!(
                        snapshot
                            .error
                            .unwrap_or_else(|| "no Omi device found".to_string())
                    );
                }
            }
        }
    };

    coordinator.connect(&device_id, device_name.as_deref()).await;
    let snapshot = coordinator.snapshot();
    if !snapshot.is_connected() {
        bail!(
            snapshot
                .error
                .unwrap_or_else(|| "connection did not complete".to_string())
        );
    }
    info!("Connected: {}", serde_json::to_string_pretty(&snapshot)?);

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let on_bytes: AudioBytesCallback = Arc::new(move |bytes: Vec<u8>| {
        counter.fetch_add(bytes.len(), Ordering::Relaxed);
    });
    coordinator.start_audio_listener(on_bytes).await;
    if coordinator.snapshot().is_streaming_audio {
        info!("Audio streaming; press ctrl-c to stop");
    } else {
        info!("Audio streaming unavailable; press ctrl-c to disconnect");
    }

    let mut battery_tick = tokio::time::interval(Duration::from_secs(60));
    battery_tick.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = battery_tick.tick() => coordinator.refresh_battery().await,
        }
    }

    info!(
        "Shutting down; {} audio bytes received",
        received.load(Ordering::Relaxed)
    );
    coordinator.stop_audio_listener().await;
    coordinator.disconnect().await;
    Ok(())
}
