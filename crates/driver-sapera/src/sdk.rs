//! Acquisition SDK seam.
//!
//! The driver talks to the vendor SDK only through these traits. Each object
//! mirrors one Sapera LT class:
//!
//! | Trait            | Sapera class         |
//! |------------------|----------------------|
//! | [`Location`]     | `SapLocation`        |
//! | [`AcqDevice`]    | `SapAcqDevice`       |
//! | [`TransferBuffer`] | `SapBufferWithTrash` |
//! | [`Transfer`]     | `SapAcqDeviceToBuf`  |
//!
//! Handles are released with an explicit `destroy()` so the session controls
//! teardown order. `destroy()` must tolerate being called on an object whose
//! creation succeeded but that never transferred a frame.

use frame_core::{PixelFormat, SdkError};
use std::path::Path;
use std::sync::Arc;

/// Resource class used when enumerating servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    AcqDevice,
}

/// Memory type of a transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Driver-chosen memory.
    Default,
    /// Physically contiguous memory.
    Contiguous,
    /// Hardware-managed, possibly non-contiguous physical memory.
    ScatterGather,
    /// Scatter-gather memory addressed physically by the board.
    ScatterGatherPhysical,
}

/// Event raised by a transfer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventType {
    None,
    StartOfFrame,
    EndOfFrame,
}

/// Per-pair transfer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPair {
    pub channel: usize,
    pub event_type: TransferEventType,
}

/// Notification passed to the completion handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEvent {
    pub event_type: TransferEventType,
    /// Index of the buffer that was just filled.
    pub buffer_index: usize,
}

/// Completion handler registered on a transfer.
///
/// Invoked on a thread owned by the SDK, concurrently with the acquisition
/// worker.
pub type TransferNotify = Box<dyn Fn(&TransferEvent) + Send + Sync>;

/// A resolved acquisition server location.
pub trait Location: Send {
    fn server_name(&self) -> &str;
    fn device_index(&self) -> u32;
    fn destroy(&mut self) -> Result<(), SdkError>;
}

/// An opened acquisition device.
pub trait AcqDevice: Send {
    fn destroy(&mut self) -> Result<(), SdkError>;
}

/// A ring of transfer buffers.
///
/// Shared between the session and the transfer's completion handler.
pub trait TransferBuffer: Send + Sync {
    fn count(&self) -> usize;
    fn memory_type(&self) -> MemoryType;
    fn format(&self) -> PixelFormat;
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Copy `pixel_count` pixel units starting at `offset` out of the current
    /// buffer into `dst`. `dst` must hold at least `pixel_count` units.
    fn read(&self, offset: usize, pixel_count: usize, dst: &mut [u8]) -> Result<(), SdkError>;

    fn destroy(&self) -> Result<(), SdkError>;
}

/// A device-to-buffer transfer engine.
pub trait Transfer: Send {
    /// Start continuous acquisition into the buffer ring.
    fn grab(&mut self) -> Result<(), SdkError>;
    /// Stop acquisition after the frame in progress.
    fn freeze(&mut self) -> Result<(), SdkError>;
    fn destroy(&mut self) -> Result<(), SdkError>;
}

/// Entry point into the acquisition SDK.
pub trait AcquisitionSdk: Send + Sync + 'static {
    /// Names of servers exposing the given resource class.
    fn server_names(&self, resource: ResourceType) -> Result<Vec<String>, SdkError>;

    fn create_location(
        &self,
        server_name: &str,
        device_index: u32,
    ) -> Result<Box<dyn Location>, SdkError>;

    fn create_device(
        &self,
        location: &dyn Location,
        config_file: &Path,
    ) -> Result<Box<dyn AcqDevice>, SdkError>;

    fn create_buffer(
        &self,
        device: &dyn AcqDevice,
        count: usize,
        memory: MemoryType,
    ) -> Result<Arc<dyn TransferBuffer>, SdkError>;

    fn create_transfer(
        &self,
        device: &dyn AcqDevice,
        buffer: Arc<dyn TransferBuffer>,
        pairs: &[TransferPair],
        notify: TransferNotify,
    ) -> Result<Box<dyn Transfer>, SdkError>;
}
