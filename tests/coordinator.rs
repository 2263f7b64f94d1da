//! Integration tests driving the device coordinator through the scripted
//! SDK double: discovery, connection lifecycle, audio streaming, and the
//! unavailable-capability path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_test::{assert_pending, assert_ready, task};

use omi_device_bridge::config::CoordinatorConfig;
use omi_device_bridge::core::bluetooth::mock::{ConnectBehavior, MockProvider, MockSdk};
use omi_device_bridge::core::bluetooth::{
    AudioBytesCallback, BLE_UNAVAILABLE_MESSAGE, CONNECTION_FAILED_MESSAGE, ConnectionPhase,
    DeviceCoordinator, DeviceEvent, DiscoveredDevice,
};

fn coordinator_for(sdk: &Arc<MockSdk>) -> DeviceCoordinator {
    DeviceCoordinator::new(
        Arc::new(MockProvider::available(sdk.clone())),
        CoordinatorConfig::default(),
    )
}

fn device(id: &str, name: &str, rssi: i16) -> DiscoveredDevice {
    DiscoveredDevice::new(id.to_string(), name.to_string(), rssi)
}

fn discard_audio() -> AudioBytesCallback {
    Arc::new(|_bytes| {})
}

/// Lets spawned coordinator tasks (timers, teardowns) run.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// -- scanning ---------------------------------------------------------------

#[tokio::test]
async fn scan_reports_discovered_devices() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.start_scan().await;
    sdk.emit_discovery(device("AA", "Omi-1", -40));

    let snapshot = coordinator.snapshot();
    assert!(snapshot.is_scanning);
    assert_eq!(snapshot.devices, vec![device("AA", "Omi-1", -40)]);
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn rediscovery_replaces_the_existing_entry() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.start_scan().await;
    sdk.emit_discovery(device("AA", "Omi-1", -40));
    sdk.emit_discovery(device("BB", "Omi-2", -55));
    sdk.emit_discovery(device("AA", "Omi-1", -35));

    let snapshot = coordinator.snapshot();
    assert_eq!(
        snapshot.devices,
        vec![device("AA", "Omi-1", -35), device("BB", "Omi-2", -55)]
    );
}

#[tokio::test(start_paused = true)]
async fn scan_times_out_but_keeps_the_device_list() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.start_scan().await;
    sdk.emit_discovery(device("AA", "Omi-1", -40));

    tokio::time::sleep(Duration::from_secs(16)).await;
    settle().await;

    let snapshot = coordinator.snapshot();
    assert!(!snapshot.is_scanning);
    assert_eq!(snapshot.devices, vec![device("AA", "Omi-1", -40)]);
}

#[tokio::test]
async fn returned_handle_stops_the_scan_early() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    let handle = coordinator.start_scan().await.expect("scan should start");
    assert!(coordinator.snapshot().is_scanning);

    handle.stop();
    settle().await;
    assert!(!coordinator.snapshot().is_scanning);
}

#[tokio::test]
async fn stop_scan_without_a_scan_is_a_noop() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    let before = coordinator.snapshot();
    coordinator.stop_scan();
    assert_eq!(coordinator.snapshot(), before);
}

#[tokio::test]
async fn starting_a_new_scan_clears_previous_results() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.start_scan().await;
    sdk.emit_discovery(device("AA", "Omi-1", -40));
    coordinator.stop_scan();

    coordinator.start_scan().await;
    let snapshot = coordinator.snapshot();
    assert!(snapshot.is_scanning);
    assert!(snapshot.devices.is_empty());
    assert_eq!(sdk.call_count("scan"), 2);
}

#[tokio::test]
async fn scan_while_connected_is_a_noop() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    assert!(coordinator.is_connected());

    assert!(coordinator.start_scan().await.is_none());
    let snapshot = coordinator.snapshot();
    assert!(!snapshot.is_scanning);
    assert_eq!(snapshot.error, None);
    assert_eq!(sdk.call_count("scan"), 0);
}

// -- connecting -------------------------------------------------------------

#[tokio::test]
async fn connect_happy_path_records_device_and_queries() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.start_scan().await;
    sdk.emit_discovery(device("AA", "Omi-1", -40));
    coordinator.connect("AA", Some("Omi-1")).await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Connected);
    assert_eq!(snapshot.connected_device_id.as_deref(), Some("AA"));
    assert_eq!(snapshot.connected_device_name.as_deref(), Some("Omi-1"));
    assert_eq!(snapshot.battery_level, Some(90));
    assert!(snapshot.devices.is_empty());
    assert!(!snapshot.is_scanning);
    assert!(!snapshot.is_connecting);
    assert_eq!(snapshot.error, None);
    assert_eq!(sdk.call_count("battery"), 1);
    assert_eq!(sdk.call_count("codec"), 1);
}

#[tokio::test]
async fn connect_refusal_stores_the_fixed_message() {
    let sdk = MockSdk::new();
    sdk.set_connect_behavior(ConnectBehavior::Refuse);
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", None).await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.error.as_deref(), Some(CONNECTION_FAILED_MESSAGE));
    assert!(!snapshot.is_connecting);
}

#[tokio::test]
async fn connect_rejection_surfaces_the_sdk_message() {
    let sdk = MockSdk::new();
    sdk.set_connect_behavior(ConnectBehavior::Reject("timeout".to_string()));
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("BB", None).await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.connected_device_id, None);
    assert_eq!(snapshot.error.as_deref(), Some("timeout"));
    assert!(!snapshot.is_connecting);
}

#[tokio::test]
async fn silent_success_leaves_the_phase_to_the_sdk() {
    let sdk = MockSdk::new();
    sdk.set_connect_behavior(ConnectBehavior::SucceedSilently);
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;

    // `Ok(true)` without a state callback: the phase stays `Connecting`
    // until the SDK reports, but the in-flight flag still settles and no
    // connected-only fields appear.
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Connecting);
    assert!(!snapshot.is_connecting);
    assert_eq!(snapshot.connected_device_id, None);
    assert_eq!(snapshot.battery_level, None);
    assert_eq!(snapshot.error, None);

    // The late callback completes the handshake.
    sdk.emit_phase("AA", ConnectionPhase::Connected);
    assert_eq!(
        coordinator.snapshot().connection_phase,
        ConnectionPhase::Connected
    );
}

#[tokio::test]
async fn failed_queries_leave_battery_and_codec_absent() {
    let sdk = MockSdk::new();
    sdk.set_battery(Err("read failed"));
    sdk.set_codec(Err("read failed"));
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Connected);
    assert_eq!(snapshot.battery_level, None);
    assert_eq!(snapshot.audio_codec, None);
    // Query failures are not connection failures.
    assert_eq!(snapshot.error, None);
}

#[tokio::test(start_paused = true)]
async fn connecting_flag_is_symmetric_around_a_stalled_call() {
    let sdk = MockSdk::new();
    sdk.set_connect_delay(Duration::from_millis(500));
    sdk.set_connect_behavior(ConnectBehavior::Reject("timeout".to_string()));
    let coordinator = coordinator_for(&sdk);

    assert!(!coordinator.snapshot().is_connecting);
    let mut connect = task::spawn(coordinator.connect("AA", None));
    assert_pending!(connect.poll());
    assert!(coordinator.snapshot().is_connecting);

    tokio::time::advance(Duration::from_millis(600)).await;
    assert_ready!(connect.poll());

    let snapshot = coordinator.snapshot();
    assert!(!snapshot.is_connecting);
    assert_eq!(snapshot.error.as_deref(), Some("timeout"));
}

#[tokio::test(start_paused = true)]
async fn second_connect_while_one_is_in_flight_is_rejected() {
    let sdk = MockSdk::new();
    sdk.set_connect_delay(Duration::from_millis(500));
    let coordinator = coordinator_for(&sdk);

    let mut first = task::spawn(coordinator.connect("AA", Some("Omi-1")));
    assert_pending!(first.poll());

    // Single-flight: the second request returns without reaching the SDK.
    coordinator.connect("BB", Some("Omi-2")).await;
    assert_eq!(sdk.call_count("connect"), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    assert_ready!(first.poll());
    assert_eq!(
        coordinator.snapshot().connected_device_id.as_deref(),
        Some("AA")
    );
}

#[tokio::test]
async fn connect_while_connected_is_a_noop() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.connect("BB", Some("Omi-2")).await;

    assert_eq!(sdk.call_count("connect"), 1);
    assert_eq!(
        coordinator.snapshot().connected_device_id.as_deref(),
        Some("AA")
    );
}

#[tokio::test]
async fn connected_id_is_present_iff_connected() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.connected_device_id, None);

    coordinator.connect("AA", Some("Omi-1")).await;
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Connected);
    assert!(snapshot.connected_device_id.is_some());

    coordinator.disconnect().await;
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.connected_device_id, None);
}

// -- disconnecting ----------------------------------------------------------

#[tokio::test]
async fn disconnect_with_nothing_connected_is_a_noop() {
    let sdk = MockSdk::new();
    let provider = Arc::new(MockProvider::available(sdk.clone()));
    let coordinator = DeviceCoordinator::new(provider.clone(), CoordinatorConfig::default());

    coordinator.disconnect().await;

    // The capability was never acquired, let alone called.
    assert_eq!(provider.acquire_count(), 0);
    assert!(sdk.calls().is_empty());
    assert_eq!(coordinator.snapshot().error, None);
}

#[tokio::test]
async fn failed_disconnect_still_clears_connection_fields() {
    let sdk = MockSdk::new();
    sdk.set_disconnect(Err("Disconnect failed"));
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.disconnect().await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("Disconnect failed"));
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.connected_device_id, None);
    assert_eq!(snapshot.connected_device_name, None);
    assert_eq!(snapshot.battery_level, None);
    assert_eq!(snapshot.audio_codec, None);
}

#[tokio::test]
async fn failed_audio_teardown_during_disconnect_sets_the_error() {
    let sdk = MockSdk::new();
    sdk.set_audio_stop(Err("teardown failed"));
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(discard_audio()).await;
    coordinator.disconnect().await;

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("teardown failed"));
    // The teardown failure does not stop the disconnect itself.
    assert_eq!(sdk.call_count("disconnect"), 1);
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert!(!snapshot.is_streaming_audio);
    assert_eq!(snapshot.connected_device_id, None);
}

#[tokio::test]
async fn sdk_driven_disconnect_resets_the_connection() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    sdk.emit_phase("AA", ConnectionPhase::Disconnected);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.connected_device_id, None);
    assert_eq!(snapshot.battery_level, None);
}

// -- audio streaming --------------------------------------------------------

#[tokio::test]
async fn audio_stream_follows_the_link_down() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(discard_audio()).await;
    assert!(coordinator.snapshot().is_streaming_audio);

    // The device drops the link; streaming must not survive it.
    sdk.emit_phase("AA", ConnectionPhase::Disconnected);
    settle().await;

    let snapshot = coordinator.snapshot();
    assert!(!snapshot.is_streaming_audio);
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert_eq!(snapshot.connected_device_id, None);
    assert_eq!(sdk.call_count("audio_stop"), 1);
}

#[tokio::test]
async fn disconnect_tears_audio_down_before_severing_the_link() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(discard_audio()).await;
    coordinator.disconnect().await;

    let calls = sdk.calls();
    let stop_at = calls.iter().position(|c| *c == "audio_stop").unwrap();
    let disconnect_at = calls.iter().position(|c| *c == "disconnect").unwrap();
    assert!(stop_at < disconnect_at, "audio teardown must come first");
    assert!(!coordinator.snapshot().is_streaming_audio);
}

#[tokio::test]
async fn audio_listener_requires_a_connection() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.start_audio_listener(discard_audio()).await;

    assert!(!coordinator.snapshot().is_streaming_audio);
    assert_eq!(sdk.call_count("audio_start"), 0);
}

#[tokio::test]
async fn audio_listener_is_idempotent_while_streaming() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(discard_audio()).await;
    coordinator.start_audio_listener(discard_audio()).await;

    assert_eq!(sdk.call_count("audio_start"), 1);
    assert!(coordinator.snapshot().is_streaming_audio);
}

#[tokio::test]
async fn audio_start_failure_is_silent() {
    let sdk = MockSdk::new();
    sdk.set_audio_start(Err("subscribe failed"));
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(discard_audio()).await;

    let snapshot = coordinator.snapshot();
    assert!(!snapshot.is_streaming_audio);
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn stop_audio_listener_without_a_stream_is_a_noop() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    let before = coordinator.snapshot();
    coordinator.stop_audio_listener().await;

    assert_eq!(coordinator.snapshot(), before);
    assert_eq!(sdk.call_count("audio_stop"), 0);
}

#[tokio::test]
async fn stop_audio_listener_clears_state_even_when_teardown_fails() {
    let sdk = MockSdk::new();
    sdk.set_audio_stop(Err("teardown failed"));
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(discard_audio()).await;
    coordinator.stop_audio_listener().await;

    assert!(!coordinator.snapshot().is_streaming_audio);
    // The handle is gone; a second stop has nothing to tear down.
    coordinator.stop_audio_listener().await;
    assert_eq!(sdk.call_count("audio_stop"), 1);
}

#[tokio::test]
async fn audio_bytes_reach_the_registered_callback() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let on_bytes: AudioBytesCallback = Arc::new(move |bytes: Vec<u8>| {
        counter.fetch_add(bytes.len(), Ordering::SeqCst);
    });

    coordinator.connect("AA", Some("Omi-1")).await;
    coordinator.start_audio_listener(on_bytes).await;
    sdk.emit_audio(vec![3, 0, 1, 0xde, 0xad]);

    assert_eq!(received.load(Ordering::SeqCst), 5);
}

// -- battery ----------------------------------------------------------------

#[tokio::test]
async fn refresh_battery_updates_the_level() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    sdk.set_battery(Ok(Some(42)));
    coordinator.refresh_battery().await;

    assert_eq!(coordinator.snapshot().battery_level, Some(42));
}

#[tokio::test]
async fn refresh_battery_failure_clears_the_stale_level() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", Some("Omi-1")).await;
    assert_eq!(coordinator.snapshot().battery_level, Some(90));

    sdk.set_battery(Err("read failed"));
    coordinator.refresh_battery().await;

    assert_eq!(coordinator.snapshot().battery_level, None);
    assert_eq!(coordinator.snapshot().error, None);
}

#[tokio::test]
async fn refresh_battery_while_disconnected_is_a_noop() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);

    coordinator.refresh_battery().await;
    assert_eq!(sdk.call_count("battery"), 0);
}

// -- capability unavailable -------------------------------------------------

#[tokio::test]
async fn unavailable_capability_short_circuits_every_operation() {
    let provider = Arc::new(MockProvider::unavailable());
    let coordinator = DeviceCoordinator::new(provider.clone(), CoordinatorConfig::default());

    assert!(coordinator.start_scan().await.is_none());
    let snapshot = coordinator.snapshot();
    assert!(snapshot.ble_unavailable);
    assert_eq!(snapshot.error.as_deref(), Some(BLE_UNAVAILABLE_MESSAGE));
    assert!(!snapshot.is_scanning);
    assert_eq!(provider.acquire_count(), 1);

    // Sticky: later operations short-circuit without re-probing.
    coordinator.connect("AA", None).await;
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some(BLE_UNAVAILABLE_MESSAGE));
    assert_eq!(snapshot.connection_phase, ConnectionPhase::Disconnected);
    assert!(!snapshot.is_connecting);
    assert_eq!(provider.acquire_count(), 1);
}

// -- errors and events ------------------------------------------------------

#[tokio::test]
async fn clear_error_discards_the_stored_message() {
    let sdk = MockSdk::new();
    sdk.set_connect_behavior(ConnectBehavior::Refuse);
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", None).await;
    assert!(coordinator.snapshot().error.is_some());

    coordinator.clear_error();
    assert_eq!(coordinator.snapshot().error, None);
}

#[tokio::test]
async fn new_scan_clears_a_previous_error() {
    let sdk = MockSdk::new();
    sdk.set_connect_behavior(ConnectBehavior::Refuse);
    let coordinator = coordinator_for(&sdk);

    coordinator.connect("AA", None).await;
    assert!(coordinator.snapshot().error.is_some());

    coordinator.start_scan().await;
    assert_eq!(coordinator.snapshot().error, None);
}

#[tokio::test]
async fn events_narrate_the_scan_and_connect_flow() {
    let sdk = MockSdk::new();
    let coordinator = coordinator_for(&sdk);
    let mut events = coordinator.subscribe();

    coordinator.start_scan().await;
    sdk.emit_discovery(device("AA", "Omi-1", -40));
    coordinator.connect("AA", Some("Omi-1")).await;

    assert_eq!(events.recv().await.unwrap(), DeviceEvent::ScanStarted);
    assert_eq!(
        events.recv().await.unwrap(),
        DeviceEvent::DeviceFound(device("AA", "Omi-1", -40))
    );
    assert_eq!(
        events.recv().await.unwrap(),
        DeviceEvent::PhaseChanged(ConnectionPhase::Connecting)
    );
    assert_eq!(events.recv().await.unwrap(), DeviceEvent::ScanCompleted);
    assert_eq!(
        events.recv().await.unwrap(),
        DeviceEvent::PhaseChanged(ConnectionPhase::Connected)
    );
    assert_eq!(
        events.recv().await.unwrap(),
        DeviceEvent::BatteryUpdated(Some(90))
    );
}
