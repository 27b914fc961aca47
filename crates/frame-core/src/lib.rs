//! `frame-core`
//!
//! Core types shared by the acquisition driver and the bridge application.
//!
//! ## Key Types
//!
//! - [`Frame`]: A captured image, copied out of the hardware transfer buffer
//! - [`PixelFormat`]: The acquisition SDK's buffer format enumeration
//! - [`classify`]: Maps a hardware format to the image layout we emit
//! - [`DeviceIdentity`]: Which server/device/config file a session opens
//! - [`AcquisitionError`]: Terminal errors delivered to stream consumers

pub mod data;
pub mod error;
pub mod identity;
pub mod pixel_format;

pub use data::{ElementDepth, Frame};
pub use error::{AcquisitionError, SdkError};
pub use identity::DeviceIdentity;
pub use pixel_format::{classify, PixelFormat, PixelLayout};
