//! Glue between configuration, the simulated backend and the frame stream.
//!
//! `acquire` attaches a number of concurrent consumers to one device, lets each
//! read a fixed number of frames and then detaches them, which closes the
//! session.

use crate::config::BridgeConfig;
use anyhow::{Context, Result};
use driver_sapera::mock::MockSdk;
use driver_sapera::AcquisitionDevice;
use frame_core::Frame;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for the session to be released after the last consumer
/// detaches.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// A free-running simulated frame grabber exposing the configured server.
pub fn simulated_sdk(config: &BridgeConfig) -> MockSdk {
    MockSdk::with_servers(vec![config.device.server_name.clone()])
        .with_resolution(config.simulation.width, config.simulation.height)
        .with_format(config.simulation.format)
        .with_frame_interval(Duration::from_millis(config.simulation.frame_interval_ms))
}

/// Per-frame summary printed by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub subscriber: usize,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub mean: f64,
}

impl FrameSummary {
    fn new(subscriber: usize, frame: &Frame) -> Self {
        Self {
            subscriber,
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            channels: frame.channels,
            mean: frame.mean(),
        }
    }
}

impl std::fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] frame {:>5}  {}x{}x{}  mean {:.2}",
            self.subscriber, self.sequence, self.width, self.height, self.channels, self.mean
        )
    }
}

/// Attach `subscribers` consumers to `device` and read `frames` frames on each.
///
/// `on_frame` is called for every frame received, on the consumer's task.
/// Returns the summaries per subscriber once every consumer has detached.
pub async fn acquire<F>(
    device: Arc<AcquisitionDevice>,
    frames: usize,
    subscribers: usize,
    on_frame: F,
) -> Result<Vec<Vec<FrameSummary>>>
where
    F: Fn(&FrameSummary) + Send + Sync + 'static,
{
    let on_frame = Arc::new(on_frame);

    // Subscribe up front so every consumer joins the same session.
    let streams: Vec<_> = (0..subscribers).map(|_| device.subscribe()).collect();
    tracing::info!(
        device = %device.identity(),
        subscribers,
        frames,
        "Consumers attached"
    );

    let consumers: Vec<_> = streams
        .into_iter()
        .enumerate()
        .map(|(id, stream)| {
            let on_frame = on_frame.clone();
            tokio::spawn(async move {
                let mut stream = stream.take(frames);
                let mut seen = Vec::with_capacity(frames);
                while let Some(item) = stream.next().await {
                    let frame = item.with_context(|| format!("subscriber {id} failed"))?;
                    let summary = FrameSummary::new(id, &frame);
                    on_frame(&summary);
                    seen.push(summary);
                }
                anyhow::Ok(seen)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(subscribers);
    for consumer in consumers {
        results.push(consumer.await.context("consumer task panicked")??);
    }
    tracing::info!(device = %device.identity(), "Consumers detached");
    Ok(results)
}

/// Block until every resource of the simulated device has been released.
pub async fn wait_for_release(sdk: MockSdk) -> Result<()> {
    let released = tokio::task::spawn_blocking(move || sdk.wait_until_released(RELEASE_TIMEOUT))
        .await
        .context("release watcher panicked")?;
    anyhow::ensure!(released, "session still open after {:?}", RELEASE_TIMEOUT);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationConfig, DeviceConfig, SimulationConfig};
    use frame_core::PixelFormat;
    use std::path::PathBuf;

    fn config(format: PixelFormat) -> BridgeConfig {
        BridgeConfig {
            application: ApplicationConfig::default(),
            device: DeviceConfig {
                server_name: "Xtium-CL_MX4_1".to_string(),
                device_index: 0,
                config_file: PathBuf::from("camera.ccf"),
            },
            simulation: SimulationConfig {
                width: 8,
                height: 4,
                format,
                frame_interval_ms: 2,
            },
        }
    }

    #[test]
    fn test_simulated_sdk_exposes_configured_server() {
        let sdk = simulated_sdk(&config(PixelFormat::Mono8));
        let servers = AcquisitionDevice::available_servers(&sdk).unwrap();
        assert_eq!(servers, vec!["Xtium-CL_MX4_1".to_string()]);
    }

    #[test]
    fn test_summary_display() {
        let summary = FrameSummary {
            subscriber: 1,
            sequence: 42,
            width: 8,
            height: 4,
            channels: 3,
            mean: 12.5,
        };
        let line = summary.to_string();
        assert!(line.contains("frame    42"));
        assert!(line.contains("8x4x3"));
        assert!(line.contains("mean 12.50"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acquire_shares_one_session() {
        let config = config(PixelFormat::Mono8);
        // Slow device teardown: release must cover it, not just the transfer.
        let sdk = simulated_sdk(&config).with_teardown_delay(Duration::from_millis(20));
        let device = Arc::new(AcquisitionDevice::new(
            Arc::new(sdk.clone()),
            config.device.identity(),
        ));

        let results = acquire(device.clone(), 3, 2, |_| {}).await.unwrap();
        assert_eq!(results.len(), 2);
        for summaries in &results {
            assert_eq!(summaries.len(), 3);
            assert!(summaries.windows(2).all(|w| w[0].sequence < w[1].sequence));
        }

        wait_for_release(sdk.clone()).await.unwrap();
        assert_eq!(sdk.stats().devices_opened, 1);
        assert!(sdk.stats().is_balanced());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acquire_reports_unsupported_format() {
        let config = config(PixelFormat::Mono16);
        let sdk = simulated_sdk(&config);
        let device = Arc::new(AcquisitionDevice::new(
            Arc::new(sdk.clone()),
            config.device.identity(),
        ));

        let err = acquire(device, 3, 1, |_| {}).await.unwrap_err();
        let root = err.root_cause().to_string();
        assert!(root.contains("Unsupported pixel type"), "{root}");
    }
}
