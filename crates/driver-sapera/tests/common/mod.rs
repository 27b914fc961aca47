//! Shared helpers for the stream integration tests.

#![allow(dead_code)] // Not every helper is used by every test file

use driver_sapera::mock::{MockSdk, MOCK_SERVER};
use driver_sapera::AcquisitionDevice;
use frame_core::DeviceIdentity;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new(MOCK_SERVER, 0, "configs/mock.ccf")
}

/// A device backed by `sdk`.
pub fn device(sdk: &MockSdk) -> AcquisitionDevice {
    AcquisitionDevice::new(Arc::new(sdk.clone()), identity())
}

/// Poll `cond` until it holds, panicking after [`WAIT`].
pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Fire `count` end-of-frame events from a separate thread, standing in for
/// the SDK callback thread.
pub fn fire_frames(sdk: &MockSdk, count: usize) -> std::thread::JoinHandle<usize> {
    let sdk = sdk.clone();
    std::thread::spawn(move || (0..count).filter(|_| sdk.fire_end_of_frame()).count())
}

/// Route driver logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
