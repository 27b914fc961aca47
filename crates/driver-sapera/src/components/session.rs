//! Device session: location, device, double buffer and transfer.
//!
//! Resources are acquired in a fixed order and released in exactly the
//! reverse order. `open()` prepares the transfer; `start()` begins the
//! continuous grab, so the caller decides when completion events may flow. Each handle lives in an `Option` slot that is filled as soon
//! as creation succeeds, so a failure half-way through `open()` drops a
//! session holding precisely the subset already acquired; `Drop` then runs the
//! same teardown as a normal close.
//!
//! Teardown never fails. SDK errors while releasing are logged at `warn` and
//! otherwise ignored.

use crate::components::signal::AutoResetEvent;
use crate::sdk::{
    AcqDevice, AcquisitionSdk, Location, MemoryType, Transfer, TransferBuffer, TransferEventType,
    TransferNotify, TransferPair,
};
use frame_core::{AcquisitionError, DeviceIdentity, SdkError};
use std::sync::Arc;

/// Number of transfer buffers: one filled by hardware while the other is read.
pub const BUFFER_COUNT: usize = 2;

/// Memory type requested for the transfer buffers.
pub const BUFFER_MEMORY: MemoryType = MemoryType::ScatterGather;

/// An opened acquisition session.
///
/// # Drop Order
///
/// Teardown is explicit in [`DeviceSession::close`], not left to field order:
/// transfer, buffer, device, location.
pub struct DeviceSession {
    identity: DeviceIdentity,
    location: Option<Box<dyn Location>>,
    device: Option<Box<dyn AcqDevice>>,
    buffer: Option<Arc<dyn TransferBuffer>>,
    transfer: Option<Box<dyn Transfer>>,
    grabbing: bool,
    signal: Arc<AutoResetEvent>,
}

impl DeviceSession {
    /// Open a session for `identity`. The transfer is created but not started.
    ///
    /// `signal` is raised by the completion handler; `make_handler` receives
    /// the buffer ring and that signal and returns the handler registered on
    /// transfer pair 0 (end-of-frame).
    pub fn open(
        sdk: &dyn AcquisitionSdk,
        identity: &DeviceIdentity,
        signal: Arc<AutoResetEvent>,
        make_handler: impl FnOnce(Arc<dyn TransferBuffer>, Arc<AutoResetEvent>) -> TransferNotify,
    ) -> Result<Self, AcquisitionError> {
        let span = tracing::info_span!(
            "session_open",
            server = %identity.server_name,
            device_index = identity.device_index
        );
        let _enter = span.enter();

        let mut session = Self {
            identity: identity.clone(),
            location: None,
            device: None,
            buffer: None,
            transfer: None,
            grabbing: false,
            signal,
        };

        let location = session.location.insert(
            sdk.create_location(&identity.server_name, identity.device_index)
                .map_err(|source| device_open_error(identity, source))?,
        );
        tracing::debug!("Location resolved");

        let device = session.device.insert(
            sdk.create_device(&**location, &identity.config_file)
                .map_err(|source| device_open_error(identity, source))?,
        );
        tracing::debug!(config_file = %identity.config_file.display(), "Device opened");

        let buffer = sdk
            .create_buffer(&**device, BUFFER_COUNT, BUFFER_MEMORY)
            .map_err(AcquisitionError::BufferCreate)?;
        session.buffer = Some(buffer.clone());
        tracing::debug!(
            count = buffer.count(),
            width = buffer.width(),
            height = buffer.height(),
            format = ?buffer.format(),
            "Buffer created"
        );

        let pairs = [TransferPair {
            channel: 0,
            event_type: TransferEventType::EndOfFrame,
        }];
        let notify = make_handler(buffer.clone(), session.signal.clone());
        session.transfer = Some(
            sdk.create_transfer(&**device, buffer, &pairs, notify)
                .map_err(AcquisitionError::TransferCreate)?,
        );

        tracing::info!("Acquisition session open");
        Ok(session)
    }

    /// Start the continuous grab. Completion events may arrive as soon as
    /// this is called.
    ///
    /// On failure the session stays as it was; `close()` (or `Drop`) releases
    /// it without a freeze.
    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.grabbing {
            return Ok(());
        }
        let transfer = self.transfer.as_mut().ok_or_else(|| {
            AcquisitionError::TransferCreate(SdkError::new(
                "SapTransfer::Grab",
                "session is closed",
            ))
        })?;
        transfer.grab().map_err(AcquisitionError::TransferCreate)?;
        self.grabbing = true;
        tracing::debug!(device = %self.identity, "Transfer grabbing");
        Ok(())
    }

    pub fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The buffer ring, while the session is open.
    pub fn buffer(&self) -> Option<&Arc<dyn TransferBuffer>> {
        self.buffer.as_ref()
    }

    /// The signal raised by the completion handler.
    pub fn signal(&self) -> &Arc<AutoResetEvent> {
        &self.signal
    }

    pub fn is_open(&self) -> bool {
        self.location.is_some()
    }

    /// Release everything acquired so far, in reverse order.
    ///
    /// Idempotent; safe on a partially opened session.
    pub fn close(&mut self) {
        if let Some(mut transfer) = self.transfer.take() {
            if std::mem::take(&mut self.grabbing) {
                suppress("freeze transfer", transfer.freeze());
            }
            suppress("destroy transfer", transfer.destroy());
        }
        if let Some(buffer) = self.buffer.take() {
            suppress("destroy buffer", buffer.destroy());
        }
        if let Some(mut device) = self.device.take() {
            suppress("destroy device", device.destroy());
        }
        if let Some(mut location) = self.location.take() {
            suppress("destroy location", location.destroy());
            tracing::info!(
                server = %self.identity.server_name,
                device_index = self.identity.device_index,
                "Acquisition session closed"
            );
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn device_open_error(identity: &DeviceIdentity, source: SdkError) -> AcquisitionError {
    AcquisitionError::DeviceOpen {
        server_name: identity.server_name.clone(),
        device_index: identity.device_index,
        source,
    }
}

fn suppress(step: &'static str, result: Result<(), SdkError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "Ignoring teardown failure during {}", step);
    }
}
