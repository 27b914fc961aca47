//! Error types for frame acquisition.
//!
//! Errors fall into three groups:
//!
//! 1. **Setup errors** - `DeviceOpen`, `BufferCreate`, `TransferCreate`
//!    - Detected while a session is being opened
//!    - Never retried; they usually mean the server name, device index or
//!      camera config file is wrong
//!    - Recovery: fix configuration, then subscribe again
//!
//! 2. **Format errors** - `UnsupportedPixelFormat`, `BufferRead`
//!    - Detected inside the transfer completion handler
//!    - Fatal to the current session epoch
//!
//! 3. **Teardown errors** - never surfaced, only logged by the driver
//!
//! Every variant is fatal for all consumers attached to the shared stream, so
//! the type is `Clone`: one error value fans out to every subscriber.

use crate::pixel_format::PixelFormat;
use thiserror::Error;

/// Failure reported by the vendor acquisition SDK.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct SdkError {
    pub operation: &'static str,
    pub message: String,
}

impl SdkError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Terminal error of an acquisition epoch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The location could not be resolved or the device refused to open.
    #[error("Error opening device {device_index} on server '{server_name}': {source}")]
    DeviceOpen {
        server_name: String,
        device_index: u32,
        #[source]
        source: SdkError,
    },

    /// The double buffer could not be allocated.
    #[error("Error creating buffer: {0}")]
    BufferCreate(#[source] SdkError),

    /// The device-to-buffer transfer could not be created or started.
    #[error("Error creating transfer: {0}")]
    TransferCreate(#[source] SdkError),

    /// The SDK refused to copy the completed buffer out.
    #[error("Error reading buffer: {0}")]
    BufferRead(#[source] SdkError),

    /// The buffer reports a format we do not copy out.
    #[error("Unsupported pixel type: {0:?}")]
    UnsupportedPixelFormat(PixelFormat),

    /// The OS refused to create the acquisition worker thread.
    #[error("Failed to spawn acquisition worker: {0}")]
    WorkerSpawn(String),
}

impl AcquisitionError {
    /// Whether this error was raised while opening the session.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            AcquisitionError::DeviceOpen { .. }
                | AcquisitionError::BufferCreate(_)
                | AcquisitionError::TransferCreate(_)
        )
    }
}
