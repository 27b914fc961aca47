//! # Sapera Bridge
//!
//! Streams frames from a Sapera LT acquisition device to any number of
//! consumers. The work is split across the workspace:
//!
//! - **`frame_core`**: pixel formats and their classification, the `Frame`
//!   type, device identity and the `AcquisitionError` enum.
//! - **`driver_sapera`**: the device session, the acquisition loop and the
//!   shared, reconnectable `FrameStream`.
//! - this crate: configuration (`config`), logging setup (`logging`) and the
//!   glue used by the `sapera-bridge` binary (`bridge`).

pub mod bridge;
pub mod config;
pub mod logging;

pub use driver_sapera::{AcquisitionDevice, AcquisitionState, FrameStream};
pub use frame_core::{AcquisitionError, DeviceIdentity, Frame, PixelFormat};
