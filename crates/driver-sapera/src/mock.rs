//! Simulated acquisition SDK.
//!
//! `MockSdk` implements [`AcquisitionSdk`] without hardware. It is used by the
//! test suites and by the CLI. Beyond behaving like a frame grabber it records
//! everything a test needs to check resource discipline:
//!
//! - per-class open/close counters and the peak number of live devices
//! - an ordered journal of create/grab/freeze/destroy calls
//! - every identity passed to device creation
//!
//! Frames are produced either manually with [`MockSdk::fire_end_of_frame`]
//! (the handler runs on the calling thread, standing in for the SDK callback
//! thread) or by a free-running generator thread started on `grab()` when a
//! frame interval is configured.
//!
//! # Example
//!
//! ```rust,ignore
//! let sdk = MockSdk::new().with_resolution(64, 48);
//! sdk.fail_at(MockStep::Buffer); // next session fails with BufferCreate
//! ```

use crate::sdk::{
    AcqDevice, AcquisitionSdk, Location, MemoryType, ResourceType, Transfer, TransferBuffer,
    TransferEvent, TransferEventType, TransferNotify, TransferPair,
};
use frame_core::{DeviceIdentity, PixelFormat, SdkError};
use parking_lot::{Condvar, Mutex};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Server name exposed by a default `MockSdk`.
pub const MOCK_SERVER: &str = "Mock_Xtium-CL_MX4_1";

/// Creation step at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    Location,
    Device,
    Buffer,
    Transfer,
    Grab,
}

/// Resource counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub locations_opened: u32,
    pub locations_closed: u32,
    pub devices_opened: u32,
    pub devices_closed: u32,
    pub buffers_opened: u32,
    pub buffers_closed: u32,
    pub transfers_opened: u32,
    pub transfers_closed: u32,
    /// Peak number of devices open at the same time.
    pub max_live_devices: u32,
    /// End-of-frame events delivered to a handler.
    pub frames_fired: u64,
}

impl MockStats {
    /// Every acquired resource has been released exactly once.
    pub fn is_balanced(&self) -> bool {
        self.locations_opened == self.locations_closed
            && self.devices_opened == self.devices_closed
            && self.buffers_opened == self.buffers_closed
            && self.transfers_opened == self.transfers_closed
    }

    fn live_devices(&self) -> u32 {
        self.devices_opened - self.devices_closed
    }
}

#[derive(Debug, Clone)]
struct MockSettings {
    width: u32,
    height: u32,
    format: PixelFormat,
    devices_per_server: u32,
    fail_at: Option<MockStep>,
    fail_teardown: bool,
    teardown_delay: Duration,
    frame_interval: Option<Duration>,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            format: PixelFormat::Mono8,
            devices_per_server: 1,
            fail_at: None,
            fail_teardown: false,
            teardown_delay: Duration::ZERO,
            frame_interval: None,
        }
    }
}

struct Inner {
    servers: Vec<String>,
    settings: Mutex<MockSettings>,
    stats: Mutex<MockStats>,
    journal: Mutex<Vec<String>>,
    device_opens: Mutex<Vec<DeviceIdentity>>,
    /// Buffers created and not yet destroyed.
    buffers: Mutex<Vec<Arc<MockBuffer>>>,
    active: Mutex<Option<Arc<ActiveTransfer>>>,
    active_changed: Condvar,
}

impl Inner {
    fn record(&self, entry: &str) {
        self.journal.lock().push(entry.to_string());
    }

    fn check(&self, step: MockStep, operation: &'static str) -> Result<(), SdkError> {
        if self.settings.lock().fail_at == Some(step) {
            return Err(SdkError::new(operation, "injected failure"));
        }
        Ok(())
    }

    fn teardown_result(&self, operation: &'static str) -> Result<(), SdkError> {
        if self.settings.lock().fail_teardown {
            return Err(SdkError::new(operation, "injected teardown failure"));
        }
        Ok(())
    }
}

/// Simulated acquisition SDK. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MockSdk {
    inner: Arc<Inner>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    /// One server ([`MOCK_SERVER`]) with one 64x48 Mono8 device.
    pub fn new() -> Self {
        Self::with_servers(vec![MOCK_SERVER.to_string()])
    }

    pub fn with_servers(servers: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                servers,
                settings: Mutex::new(MockSettings::default()),
                stats: Mutex::new(MockStats::default()),
                journal: Mutex::new(Vec::new()),
                device_opens: Mutex::new(Vec::new()),
                buffers: Mutex::new(Vec::new()),
                active: Mutex::new(None),
                active_changed: Condvar::new(),
            }),
        }
    }

    pub fn with_resolution(self, width: u32, height: u32) -> Self {
        {
            let mut settings = self.inner.settings.lock();
            settings.width = width;
            settings.height = height;
        }
        self
    }

    pub fn with_format(self, format: PixelFormat) -> Self {
        self.set_format(format);
        self
    }

    /// Free-run at `interval` once a transfer is grabbing.
    pub fn with_frame_interval(self, interval: Duration) -> Self {
        self.inner.settings.lock().frame_interval = Some(interval);
        self
    }

    /// Sleep this long while destroying a device.
    pub fn with_teardown_delay(self, delay: Duration) -> Self {
        self.inner.settings.lock().teardown_delay = delay;
        self
    }

    /// Change the buffer format, including the buffer of a running session.
    pub fn set_format(&self, format: PixelFormat) {
        self.inner.settings.lock().format = format;
        for buffer in self.inner.buffers.lock().iter() {
            *buffer.format.lock() = format;
        }
    }

    /// Fail every subsequent attempt at `step` until cleared.
    pub fn fail_at(&self, step: MockStep) {
        self.inner.settings.lock().fail_at = Some(step);
    }

    pub fn clear_failures(&self) {
        let mut settings = self.inner.settings.lock();
        settings.fail_at = None;
        settings.fail_teardown = false;
    }

    /// Make every release report an error (the release still happens).
    pub fn fail_teardown(&self, enabled: bool) {
        self.inner.settings.lock().fail_teardown = enabled;
    }

    pub fn stats(&self) -> MockStats {
        self.inner.stats.lock().clone()
    }

    pub fn journal(&self) -> Vec<String> {
        self.inner.journal.lock().clone()
    }

    /// Identities passed to device creation, in call order.
    pub fn device_opens(&self) -> Vec<DeviceIdentity> {
        self.inner.device_opens.lock().clone()
    }

    pub fn is_grabbing(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|t| t.grabbing.load(Ordering::SeqCst))
    }

    /// Block until a transfer is grabbing or `timeout` elapses.
    pub fn wait_until_grabbing(&self, timeout: Duration) -> bool {
        self.wait_for_active(timeout, |t| {
            t.is_some_and(|t| t.grabbing.load(Ordering::SeqCst))
        })
    }

    /// Block until no transfer exists and every resource ever acquired has
    /// been released, or `timeout` elapses.
    pub fn wait_until_released(&self, timeout: Duration) -> bool {
        self.wait_for_active(timeout, |t| {
            t.is_none() && self.inner.stats.lock().is_balanced()
        })
    }

    fn wait_for_active(
        &self,
        timeout: Duration,
        done: impl Fn(Option<&Arc<ActiveTransfer>>) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.inner.active.lock();
        while !done(active.as_ref()) {
            if self
                .inner
                .active_changed
                .wait_until(&mut active, deadline)
                .timed_out()
            {
                return done(active.as_ref());
            }
        }
        true
    }

    /// Complete one frame: fill the next buffer and run the completion handler
    /// on the calling thread. Returns `false` if no transfer is grabbing.
    pub fn fire_end_of_frame(&self) -> bool {
        let active = self.inner.active.lock().clone();
        let Some(active) = active else {
            return false;
        };
        active.complete_frame(&self.inner)
    }
}

impl AcquisitionSdk for MockSdk {
    fn server_names(&self, resource: ResourceType) -> Result<Vec<String>, SdkError> {
        match resource {
            ResourceType::AcqDevice => Ok(self.inner.servers.clone()),
        }
    }

    fn create_location(
        &self,
        server_name: &str,
        device_index: u32,
    ) -> Result<Box<dyn Location>, SdkError> {
        self.inner.check(MockStep::Location, "SapLocation::Create")?;
        if !self.inner.servers.iter().any(|s| s == server_name) {
            return Err(SdkError::new(
                "SapLocation::Create",
                format!("'{}' is not an acquisition device server", server_name),
            ));
        }
        if device_index >= self.inner.settings.lock().devices_per_server {
            return Err(SdkError::new(
                "SapLocation::Create",
                format!("no device {} on server '{}'", device_index, server_name),
            ));
        }

        self.inner.stats.lock().locations_opened += 1;
        self.inner.record("create location");
        Ok(Box::new(MockLocation {
            sdk: self.inner.clone(),
            server_name: server_name.to_string(),
            device_index,
            destroyed: false,
        }))
    }

    fn create_device(
        &self,
        location: &dyn Location,
        config_file: &Path,
    ) -> Result<Box<dyn AcqDevice>, SdkError> {
        self.inner.check(MockStep::Device, "SapAcqDevice::Create")?;
        self.inner.device_opens.lock().push(DeviceIdentity::new(
            location.server_name(),
            location.device_index(),
            config_file,
        ));
        {
            let mut stats = self.inner.stats.lock();
            stats.devices_opened += 1;
            stats.max_live_devices = stats.max_live_devices.max(stats.live_devices());
        }
        self.inner.record("create device");
        Ok(Box::new(MockDevice {
            sdk: self.inner.clone(),
            destroyed: false,
        }))
    }

    fn create_buffer(
        &self,
        _device: &dyn AcqDevice,
        count: usize,
        memory: MemoryType,
    ) -> Result<Arc<dyn TransferBuffer>, SdkError> {
        self.inner.check(MockStep::Buffer, "SapBuffer::Create")?;
        let settings = self.inner.settings.lock().clone();
        let frame_bytes =
            settings.width as usize * settings.height as usize * bytes_per_pixel(settings.format);
        let buffer = Arc::new(MockBuffer {
            sdk: self.inner.clone(),
            count,
            memory,
            format: Mutex::new(settings.format),
            width: settings.width,
            height: settings.height,
            slots: Mutex::new(vec![vec![0u8; frame_bytes]; count]),
            current: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        });

        self.inner.stats.lock().buffers_opened += 1;
        self.inner.record("create buffer");
        self.inner.buffers.lock().push(buffer.clone());
        Ok(buffer)
    }

    fn create_transfer(
        &self,
        _device: &dyn AcqDevice,
        buffer: Arc<dyn TransferBuffer>,
        pairs: &[TransferPair],
        notify: TransferNotify,
    ) -> Result<Box<dyn Transfer>, SdkError> {
        self.inner
            .check(MockStep::Transfer, "SapAcqDeviceToBuf::Create")?;
        let requested = Arc::as_ptr(&buffer) as *const ();
        let buffer = self
            .inner
            .buffers
            .lock()
            .iter()
            .find(|b| Arc::as_ptr(b) as *const () == requested)
            .cloned()
            .ok_or_else(|| {
                SdkError::new(
                    "SapAcqDeviceToBuf::Create",
                    "buffer is not a live buffer of this server",
                )
            })?;

        let active = Arc::new(ActiveTransfer {
            notify,
            buffer,
            pairs: pairs.to_vec(),
            grabbing: AtomicBool::new(false),
            callback_gate: Mutex::new(()),
            frame_counter: AtomicU64::new(0),
        });
        {
            let mut slot = self.inner.active.lock();
            *slot = Some(active.clone());
            self.inner.active_changed.notify_all();
        }

        self.inner.stats.lock().transfers_opened += 1;
        self.inner.record("create transfer");
        Ok(Box::new(MockTransfer {
            sdk: self.inner.clone(),
            active,
            generator: None,
            destroyed: false,
        }))
    }
}

fn bytes_per_pixel(format: PixelFormat) -> usize {
    match format {
        PixelFormat::Rgb888 | PixelFormat::Rgbr888 => 3,
        PixelFormat::Rgb8888 | PixelFormat::Mono32 | PixelFormat::Int32 | PixelFormat::Float => 4,
        PixelFormat::Mono16 | PixelFormat::Int16 | PixelFormat::Rgb565 | PixelFormat::Rgb5551 => 2,
        _ => 1,
    }
}

struct MockLocation {
    sdk: Arc<Inner>,
    server_name: String,
    device_index: u32,
    destroyed: bool,
}

impl Location for MockLocation {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn device_index(&self) -> u32 {
        self.device_index
    }

    fn destroy(&mut self) -> Result<(), SdkError> {
        if !std::mem::replace(&mut self.destroyed, true) {
            self.sdk.stats.lock().locations_closed += 1;
            self.sdk.record("destroy location");
            // The location goes last; release waiters re-check under the lock.
            let _active = self.sdk.active.lock();
            self.sdk.active_changed.notify_all();
        }
        self.sdk.teardown_result("SapLocation::Destroy")
    }
}

struct MockDevice {
    sdk: Arc<Inner>,
    destroyed: bool,
}

impl AcqDevice for MockDevice {
    fn destroy(&mut self) -> Result<(), SdkError> {
        if !std::mem::replace(&mut self.destroyed, true) {
            let delay = self.sdk.settings.lock().teardown_delay;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            self.sdk.stats.lock().devices_closed += 1;
            self.sdk.record("destroy device");
        }
        self.sdk.teardown_result("SapAcqDevice::Destroy")
    }
}

struct MockBuffer {
    sdk: Arc<Inner>,
    count: usize,
    memory: MemoryType,
    format: Mutex<PixelFormat>,
    width: u32,
    height: u32,
    slots: Mutex<Vec<Vec<u8>>>,
    current: AtomicUsize,
    destroyed: AtomicBool,
}

impl MockBuffer {
    /// Write a test pattern for `frame_nr` into the next slot and make it
    /// current. Returns the slot index.
    fn fill_next(&self, frame_nr: u64) -> usize {
        let bpp = bytes_per_pixel(*self.format.lock());
        let index = (self.current.load(Ordering::SeqCst) + 1) % self.count.max(1);
        let mut slots = self.slots.lock();
        let slot = &mut slots[index];
        slot.resize(self.width as usize * self.height as usize * bpp, 0);
        for y in 0..self.height as usize {
            for x in 0..self.width as usize {
                for c in 0..bpp {
                    let value = (x + y + c) as u64 + frame_nr;
                    slot[(y * self.width as usize + x) * bpp + c] = (value % 256) as u8;
                }
            }
        }
        self.current.store(index, Ordering::SeqCst);
        index
    }
}

impl TransferBuffer for MockBuffer {
    fn count(&self) -> usize {
        self.count
    }

    fn memory_type(&self) -> MemoryType {
        self.memory
    }

    fn format(&self) -> PixelFormat {
        *self.format.lock()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read(&self, offset: usize, pixel_count: usize, dst: &mut [u8]) -> Result<(), SdkError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SdkError::new("SapBuffer::Read", "buffer destroyed"));
        }
        let bpp = bytes_per_pixel(self.format());
        let start = offset * bpp;
        let len = pixel_count * bpp;
        let slots = self.slots.lock();
        let slot = &slots[self.current.load(Ordering::SeqCst)];
        if start + len > slot.len() || len > dst.len() {
            return Err(SdkError::new(
                "SapBuffer::Read",
                format!(
                    "read of {} bytes at {} exceeds buffer ({}) or destination ({})",
                    len,
                    start,
                    slot.len(),
                    dst.len()
                ),
            ));
        }
        dst[..len].copy_from_slice(&slot[start..start + len]);
        Ok(())
    }

    fn destroy(&self) -> Result<(), SdkError> {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.sdk.stats.lock().buffers_closed += 1;
            self.sdk.record("destroy buffer");
            self.sdk
                .buffers
                .lock()
                .retain(|b| !std::ptr::eq(b.as_ref(), self));
        }
        self.sdk.teardown_result("SapBuffer::Destroy")
    }
}

struct ActiveTransfer {
    notify: TransferNotify,
    buffer: Arc<MockBuffer>,
    pairs: Vec<TransferPair>,
    grabbing: AtomicBool,
    /// Held while the handler runs; freeze/destroy wait on it so no handler
    /// is in flight once they return.
    callback_gate: Mutex<()>,
    frame_counter: AtomicU64,
}

impl ActiveTransfer {
    fn complete_frame(&self, sdk: &Inner) -> bool {
        let _gate = self.callback_gate.lock();
        if !self.grabbing.load(Ordering::SeqCst) {
            return false;
        }
        let frame_nr = self.frame_counter.fetch_add(1, Ordering::SeqCst);
        let index = self.buffer.fill_next(frame_nr);

        let wants_end_of_frame = self
            .pairs
            .first()
            .is_some_and(|p| p.event_type == TransferEventType::EndOfFrame);
        if !wants_end_of_frame {
            return false;
        }

        sdk.stats.lock().frames_fired += 1;
        (self.notify)(&TransferEvent {
            event_type: TransferEventType::EndOfFrame,
            buffer_index: index,
        });
        true
    }
}

struct MockTransfer {
    sdk: Arc<Inner>,
    active: Arc<ActiveTransfer>,
    generator: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
    destroyed: bool,
}

impl MockTransfer {
    fn stop_generator(&mut self) {
        if let Some((running, handle)) = self.generator.take() {
            running.store(false, Ordering::SeqCst);
            if handle.join().is_err() {
                tracing::error!("Mock frame generator panicked");
            }
        }
    }
}

impl Transfer for MockTransfer {
    fn grab(&mut self) -> Result<(), SdkError> {
        self.sdk.check(MockStep::Grab, "SapTransfer::Grab")?;
        {
            let _active = self.sdk.active.lock();
            self.active.grabbing.store(true, Ordering::SeqCst);
            self.sdk.active_changed.notify_all();
        }
        self.sdk.record("grab");

        let interval = self.sdk.settings.lock().frame_interval;
        if let Some(interval) = interval {
            let running = Arc::new(AtomicBool::new(true));
            let active = self.active.clone();
            let sdk = self.sdk.clone();
            let flag = running.clone();
            let handle = std::thread::Builder::new()
                .name("mock-frame-generator".into())
                .spawn(move || {
                    while flag.load(Ordering::SeqCst) {
                        std::thread::sleep(interval);
                        if !flag.load(Ordering::SeqCst) {
                            break;
                        }
                        active.complete_frame(&sdk);
                    }
                })
                .map_err(|e| SdkError::new("SapTransfer::Grab", e.to_string()))?;
            self.generator = Some((running, handle));
        }
        Ok(())
    }

    fn freeze(&mut self) -> Result<(), SdkError> {
        self.stop_generator();
        {
            let _gate = self.active.callback_gate.lock();
            self.active.grabbing.store(false, Ordering::SeqCst);
        }
        self.sdk.record("freeze");
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), SdkError> {
        if !std::mem::replace(&mut self.destroyed, true) {
            self.stop_generator();
            {
                let _gate = self.active.callback_gate.lock();
                self.active.grabbing.store(false, Ordering::SeqCst);
            }
            {
                let mut slot = self.sdk.active.lock();
                if slot.as_ref().is_some_and(|a| Arc::ptr_eq(a, &self.active)) {
                    *slot = None;
                }
                self.sdk.active_changed.notify_all();
            }
            self.sdk.stats.lock().transfers_closed += 1;
            self.sdk.record("destroy transfer");
        }
        self.sdk.teardown_result("SapAcqDeviceToBuf::Destroy")
    }
}
