//! Sapera LT Acquisition Device Driver (Componentized)
//!
//! Exposes one frame grabber as a shared, reconnectable stream of frames:
//! - Session: location, device, double buffer and transfer, torn down in reverse
//! - Acquisition: the blocking worker and the transfer completion handler
//! - Shared: the reference-counted, reconnectable fan-out
//!
//! The vendor SDK is reached only through the [`sdk::AcquisitionSdk`] trait.
//! With the `mock` feature (default) [`mock::MockSdk`] implements it without
//! hardware.
//!
//! # Example
//!
//! ```rust,ignore
//! let sdk = Arc::new(MockSdk::new().with_frame_interval(Duration::from_millis(10)));
//! let device = AcquisitionDevice::new(sdk, DeviceIdentity::new(MOCK_SERVER, 0, "cam.ccf"));
//! let mut frames = device.subscribe();
//! while let Some(frame) = frames.next().await {
//!     println!("frame {} mean {:.1}", frame?.sequence, ...);
//! }
//! ```

pub mod components;
#[cfg(feature = "mock")]
pub mod mock;
pub mod sdk;

use crate::components::acquisition::{AcquisitionLoop, FrameSink};
use crate::components::shared::{SharedSource, Subscription};
use crate::sdk::{AcquisitionSdk, ResourceType};
use frame_core::{AcquisitionError, DeviceIdentity, Frame, SdkError};
use std::sync::Arc;

pub use crate::components::acquisition::AcquisitionState;
pub use crate::components::session::{BUFFER_COUNT, BUFFER_MEMORY};

/// A consumer's view of an [`AcquisitionDevice`].
///
/// Yields frames in capture order. An epoch failure arrives as a final `Err`
/// item, after which the stream ends. Dropping the last `FrameStream` of a
/// device closes its session.
pub type FrameStream = Subscription<Frame, AcquisitionError>;

/// One acquisition device exposed as a shared frame stream.
///
/// Cold until the first [`subscribe`](Self::subscribe); every subscriber of a
/// running session sees the same frames. After the last subscriber leaves the
/// session is closed and the next subscriber opens a new one with the same
/// identity.
pub struct AcquisitionDevice {
    acquisition: Arc<AcquisitionLoop>,
    source: SharedSource<Frame, AcquisitionError>,
}

impl AcquisitionDevice {
    pub fn new(sdk: Arc<dyn AcquisitionSdk>, identity: DeviceIdentity) -> Self {
        let acquisition = Arc::new(AcquisitionLoop::new(sdk, identity));
        let source: SharedSource<Frame, AcquisitionError> = SharedSource::new(
            format!("sapera-{}", acquisition.identity().device_index),
            {
                let acquisition = acquisition.clone();
                move |publisher, token| {
                    let sink: Arc<dyn FrameSink> =
                        Arc::new(move |frame: Frame| publisher.publish(frame));
                    acquisition.run(sink, &token)
                }
            },
        );
        Self {
            acquisition,
            source,
        }
    }

    /// Attach a consumer. The first one opens the device.
    pub fn subscribe(&self) -> FrameStream {
        tracing::debug!(
            device = %self.acquisition.identity(),
            subscribers = self.source.subscriber_count(),
            "New subscriber"
        );
        self.source.subscribe()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.acquisition.identity()
    }

    pub fn state(&self) -> AcquisitionState {
        self.acquisition.state()
    }

    pub fn subscriber_count(&self) -> usize {
        self.source.subscriber_count()
    }

    /// Whether a session epoch is live (it may still be opening or closing).
    pub fn is_running(&self) -> bool {
        self.source.is_connected()
    }

    /// Subscription epochs started since creation.
    ///
    /// An epoch whose subscribers all leave before the worker reaches the
    /// device is counted but never opens a session, so this can exceed the
    /// number of sessions actually opened.
    pub fn epochs_started(&self) -> u64 {
        self.source.epochs_started()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.acquisition.frames_emitted()
    }

    /// Names of the servers exposing an acquisition device.
    pub fn available_servers(sdk: &dyn AcquisitionSdk) -> Result<Vec<String>, SdkError> {
        sdk.server_names(ResourceType::AcqDevice)
    }
}
