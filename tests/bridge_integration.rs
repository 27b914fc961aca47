//! End-to-end tests: shipped configuration -> simulated grabber -> consumers.

use sapera_bridge::bridge::{self, acquire, simulated_sdk};
use sapera_bridge::config::BridgeConfig;
use sapera_bridge::{AcquisitionDevice, PixelFormat};
use serial_test::serial;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn shipped_config() -> BridgeConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/bridge.toml");
    BridgeConfig::load_from(path).unwrap()
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let config = shipped_config();
    config.validate().unwrap();
    assert_eq!(config.simulation.format, PixelFormat::Mono8);
    assert_eq!(config.device.identity().device_index, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_reconnect_across_acquire_runs() {
    let mut config = shipped_config();
    config.simulation.width = 16;
    config.simulation.height = 16;
    config.simulation.frame_interval_ms = 2;

    let sdk = simulated_sdk(&config);
    let device = Arc::new(AcquisitionDevice::new(
        Arc::new(sdk.clone()),
        config.device.identity(),
    ));

    let printed = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let printed = printed.clone();
        let results = acquire(device.clone(), 4, 3, move |_| {
            printed.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert!(results.iter().all(|frames| frames.len() == 4));
        bridge::wait_for_release(sdk.clone()).await.unwrap();
    }

    assert_eq!(printed.load(Ordering::SeqCst), 2 * 3 * 4);
    let opens = sdk.device_opens();
    assert_eq!(opens.len(), 2, "one session per run");
    assert_eq!(opens[0], opens[1]);
    assert!(sdk.stats().is_balanced());
    assert_eq!(device.epochs_started(), 2);
}
