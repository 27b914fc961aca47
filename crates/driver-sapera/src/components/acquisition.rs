//! Sapera Acquisition Logic
//!
//! Runs one session epoch on a dedicated worker thread:
//!
//! ```text
//! Idle -> Opening -> Waiting <-> Emitting -> Closing -> Idle
//!            \_______________________________/
//!                    (open failure)
//! ```
//!
//! Frames are produced inside the SDK completion handler, not on the worker.
//! The handler copies the current buffer into a new [`Frame`], publishes it
//! synchronously and raises the wait signal. The worker only blocks on that
//! signal and re-checks cancellation each time it wakes. A slow consumer
//! therefore stalls the next capture cycle; nothing is queued.
//!
//! Errors raised inside the handler cannot unwind into SDK code. They are
//! posted to a single-slot fault mailbox and the signal is raised; the worker
//! picks the fault up, closes the session and reports it.

use crate::components::session::DeviceSession;
use crate::components::signal::{AutoResetEvent, CancellationToken};
use crate::sdk::{AcquisitionSdk, TransferBuffer, TransferEventType, TransferNotify};
use frame_core::{classify, AcquisitionError, DeviceIdentity, Frame, PixelFormat, PixelLayout};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives every captured frame, on the SDK callback thread.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: Frame);
}

impl<F> FrameSink for F
where
    F: Fn(Frame) + Send + Sync,
{
    fn publish(&self, frame: Frame) {
        self(frame)
    }
}

/// Lifecycle state of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Opening,
    Waiting,
    Emitting,
    Closing,
}

/// Single-slot mailbox carrying the first fatal error out of the handler.
#[derive(Debug, Default)]
struct FaultSlot {
    fault: Mutex<Option<AcquisitionError>>,
}

impl FaultSlot {
    fn post(&self, error: AcquisitionError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(error);
        }
    }

    fn is_set(&self) -> bool {
        self.fault.lock().is_some()
    }

    fn take(&self) -> Option<AcquisitionError> {
        self.fault.lock().take()
    }
}

/// The blocking acquisition worker for one device.
///
/// `run()` may be called repeatedly (once per subscription epoch); the capture
/// lock serializes calls so at most one session is ever live per loop.
pub struct AcquisitionLoop {
    sdk: Arc<dyn AcquisitionSdk>,
    identity: DeviceIdentity,
    capture_lock: Mutex<()>,
    state: Arc<Mutex<AcquisitionState>>,
    frames_emitted: Arc<AtomicU64>,
}

impl AcquisitionLoop {
    pub fn new(sdk: Arc<dyn AcquisitionSdk>, identity: DeviceIdentity) -> Self {
        Self {
            sdk,
            identity,
            capture_lock: Mutex::new(()),
            state: Arc::new(Mutex::new(AcquisitionState::Idle)),
            frames_emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    /// Frames emitted across all epochs of this loop.
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::SeqCst)
    }

    /// Open a session, deliver frames to `sink` until `token` is cancelled or
    /// the handler faults, then close the session.
    ///
    /// Blocks the calling thread for the whole epoch. Returns `Ok(())` on
    /// cancellation; setup and format errors are returned as-is. Teardown
    /// errors are never returned.
    pub fn run(
        &self,
        sink: Arc<dyn FrameSink>,
        token: &CancellationToken,
    ) -> Result<(), AcquisitionError> {
        let _capture = self.capture_lock.lock();
        if token.is_cancelled() {
            tracing::debug!("Epoch cancelled before the device was opened");
            return Ok(());
        }

        self.set_state(AcquisitionState::Opening);
        let fault = Arc::new(FaultSlot::default());
        let signal = token.wake_signal();

        let opened = DeviceSession::open(self.sdk.as_ref(), &self.identity, signal.clone(), {
            let fault = fault.clone();
            let state = self.state.clone();
            let frames_emitted = self.frames_emitted.clone();
            move |buffer, signal| {
                completion_handler(buffer, signal, sink, fault, state, frames_emitted)
            }
        });
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, device = %self.identity, "Failed to open acquisition session");
                self.set_state(AcquisitionState::Closing);
                self.set_state(AcquisitionState::Idle);
                return Err(e);
            }
        };

        // Waiting before the grab starts, so the first completion already
        // sees Waiting -> Emitting.
        self.set_state(AcquisitionState::Waiting);
        if let Err(e) = session.start() {
            tracing::error!(error = %e, device = %self.identity, "Failed to start transfer");
            self.set_state(AcquisitionState::Closing);
            session.close();
            self.set_state(AcquisitionState::Idle);
            return Err(e);
        }

        let emitted_before = self.frames_emitted();
        while !token.is_cancelled() && !fault.is_set() {
            signal.wait();
        }

        self.set_state(AcquisitionState::Closing);
        session.close();
        drop(session);
        self.set_state(AcquisitionState::Idle);

        let emitted = self.frames_emitted() - emitted_before;
        match fault.take() {
            Some(e) => {
                tracing::error!(error = %e, frames = emitted, "Acquisition epoch failed");
                Err(e)
            }
            None => {
                tracing::info!(frames = emitted, "Acquisition epoch finished");
                Ok(())
            }
        }
    }

    fn set_state(&self, state: AcquisitionState) {
        *self.state.lock() = state;
    }
}

/// Copy the buffer's current image into a new frame.
///
/// `cached` holds the layout of the last format seen, so classification runs
/// only when the negotiated format changes.
fn capture_frame(
    buffer: &dyn TransferBuffer,
    cached: &Mutex<Option<(PixelFormat, PixelLayout)>>,
) -> Result<Frame, AcquisitionError> {
    let format = buffer.format();
    let layout = {
        let mut cached = cached.lock();
        match *cached {
            Some((seen, layout)) if seen == format => layout,
            _ => {
                let layout = classify(format)?;
                tracing::info!(format = ?format, channels = layout.channels, "Buffer format negotiated");
                *cached = Some((format, layout));
                layout
            }
        }
    };

    let mut frame = Frame::zeroed(buffer.width(), buffer.height(), &layout);
    buffer
        .read(0, frame.pixel_count(), &mut frame.data)
        .map_err(AcquisitionError::BufferRead)?;
    Ok(frame)
}

fn completion_handler(
    buffer: Arc<dyn TransferBuffer>,
    signal: Arc<AutoResetEvent>,
    sink: Arc<dyn FrameSink>,
    fault: Arc<FaultSlot>,
    state: Arc<Mutex<AcquisitionState>>,
    frames_emitted: Arc<AtomicU64>,
) -> TransferNotify {
    let cached_layout = Mutex::new(None);
    let sequence = AtomicU64::new(0);

    Box::new(move |event| {
        if event.event_type != TransferEventType::EndOfFrame {
            return;
        }
        // Nothing more is emitted once the epoch has faulted.
        if !fault.is_set() {
            match capture_frame(buffer.as_ref(), &cached_layout) {
                Ok(mut frame) => {
                    // Numbers are reserved only for frames that were captured.
                    frame.sequence = sequence.fetch_add(1, Ordering::SeqCst);
                    set_emitting(&state, true);
                    tracing::trace!(sequence = frame.sequence, buffer_index = event.buffer_index, "Frame captured");
                    sink.publish(frame);
                    frames_emitted.fetch_add(1, Ordering::SeqCst);
                    set_emitting(&state, false);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Frame capture failed");
                    fault.post(e);
                }
            }
        }
        signal.set();
    })
}

fn set_emitting(state: &Mutex<AcquisitionState>, emitting: bool) {
    let mut state = state.lock();
    match (*state, emitting) {
        (AcquisitionState::Waiting, true) => *state = AcquisitionState::Emitting,
        (AcquisitionState::Emitting, false) => *state = AcquisitionState::Waiting,
        _ => {}
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::{MockSdk, MockStep, MOCK_SERVER};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn start(
        sdk: &MockSdk,
    ) -> (
        Arc<AcquisitionLoop>,
        CancellationToken,
        mpsc::Receiver<Frame>,
        thread::JoinHandle<Result<(), AcquisitionError>>,
    ) {
        let acquisition = Arc::new(AcquisitionLoop::new(
            Arc::new(sdk.clone()),
            DeviceIdentity::new(MOCK_SERVER, 0, "mock.ccf"),
        ));
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::sync_channel(64);
        let sink: Arc<dyn FrameSink> = Arc::new(move |frame: Frame| {
            let _ = tx.send(frame);
        });
        let worker = {
            let acquisition = acquisition.clone();
            let token = token.clone();
            thread::spawn(move || acquisition.run(sink, &token))
        };
        (acquisition, token, rx, worker)
    }

    #[test]
    fn test_frames_follow_event_order() {
        let sdk = MockSdk::new().with_resolution(8, 4);
        let (acquisition, token, rx, worker) = start(&sdk);
        assert!(sdk.wait_until_grabbing(WAIT));
        assert_eq!(acquisition.state(), AcquisitionState::Waiting);

        for _ in 0..10 {
            assert!(sdk.fire_end_of_frame());
        }
        let frames: Vec<Frame> = (0..10).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u64);
            assert_eq!((frame.width, frame.height, frame.channels), (8, 4, 1));
            // Pattern value at (0, 0) is the hardware frame number.
            assert_eq!(frame.data[0], i as u8);
        }

        token.cancel();
        worker.join().unwrap().unwrap();
        assert!(rx.try_recv().is_err(), "no extra frames");
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert_eq!(acquisition.frames_emitted(), 10);
        assert!(sdk.stats().is_balanced());
    }

    #[test]
    fn test_state_is_waiting_once_grabbing() {
        let sdk = MockSdk::new();
        let (acquisition, token, _rx, worker) = start(&sdk);
        assert!(sdk.wait_until_grabbing(WAIT));
        assert_eq!(acquisition.state(), AcquisitionState::Waiting);

        token.cancel();
        worker.join().unwrap().unwrap();
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_first_frame_is_published_while_emitting() {
        let sdk = MockSdk::new();
        let acquisition = Arc::new(AcquisitionLoop::new(
            Arc::new(sdk.clone()),
            DeviceIdentity::new(MOCK_SERVER, 0, "mock.ccf"),
        ));
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::sync_channel(8);
        let sink: Arc<dyn FrameSink> = {
            let acquisition = acquisition.clone();
            Arc::new(move |frame: Frame| {
                let _ = tx.send((frame.sequence, acquisition.state()));
            })
        };
        let worker = {
            let acquisition = acquisition.clone();
            let token = token.clone();
            thread::spawn(move || acquisition.run(sink, &token))
        };

        assert!(sdk.wait_until_grabbing(WAIT));
        sdk.fire_end_of_frame();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (0, AcquisitionState::Emitting));

        token.cancel();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_grab_failure_closes_session() {
        let sdk = MockSdk::new();
        sdk.fail_at(MockStep::Grab);
        let (acquisition, _token, rx, worker) = start(&sdk);

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, AcquisitionError::TransferCreate(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert!(sdk.stats().is_balanced());
        assert!(!sdk.journal().contains(&"freeze".to_string()));
    }

    /// Fixed 2x2 Mono8 buffer for driving the handler without an SDK.
    struct StillBuffer;

    impl TransferBuffer for StillBuffer {
        fn count(&self) -> usize {
            1
        }
        fn memory_type(&self) -> crate::sdk::MemoryType {
            crate::sdk::MemoryType::Default
        }
        fn format(&self) -> PixelFormat {
            PixelFormat::Mono8
        }
        fn width(&self) -> u32 {
            2
        }
        fn height(&self) -> u32 {
            2
        }
        fn read(
            &self,
            _offset: usize,
            pixel_count: usize,
            dst: &mut [u8],
        ) -> Result<(), frame_core::SdkError> {
            dst[..pixel_count].fill(7);
            Ok(())
        }
        fn destroy(&self) -> Result<(), frame_core::SdkError> {
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_completions_get_distinct_sequences() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sink: Arc<dyn FrameSink> = Arc::new(move |frame: Frame| {
            let _ = tx.lock().send(frame.sequence);
        });
        let handler = Arc::new(completion_handler(
            Arc::new(StillBuffer),
            Arc::new(AutoResetEvent::new()),
            sink,
            Arc::new(FaultSlot::default()),
            Arc::new(Mutex::new(AcquisitionState::Waiting)),
            Arc::new(AtomicU64::new(0)),
        ));

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let handler = handler.clone();
                thread::spawn(move || {
                    for index in 0..25 {
                        handler(&crate::sdk::TransferEvent {
                            event_type: TransferEventType::EndOfFrame,
                            buffer_index: index % 2,
                        });
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }

        let mut sequences: Vec<u64> = rx.try_iter().collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (0..100).collect::<Vec<u64>>());
    }

    #[test]
    fn test_cancel_while_waiting_closes_without_frames() {
        let sdk = MockSdk::new();
        let (_acquisition, token, rx, worker) = start(&sdk);
        assert!(sdk.wait_until_grabbing(WAIT));

        token.cancel();
        worker.join().unwrap().unwrap();

        assert!(rx.try_recv().is_err());
        let stats = sdk.stats();
        assert!(stats.is_balanced(), "{stats:?}");
        assert_eq!(stats.devices_opened, 1);
        assert_eq!(stats.frames_fired, 0);
    }

    #[test]
    fn test_cancelled_before_open_never_touches_device() {
        let sdk = MockSdk::new();
        let acquisition =
            AcquisitionLoop::new(Arc::new(sdk.clone()), DeviceIdentity::new(MOCK_SERVER, 0, "x"));
        let token = CancellationToken::new();
        token.cancel();

        let sink: Arc<dyn FrameSink> = Arc::new(|_frame: Frame| {});
        acquisition.run(sink, &token).unwrap();
        assert_eq!(sdk.stats().locations_opened, 0);
    }

    #[test]
    fn test_open_failure_is_returned_without_frames() {
        let sdk = MockSdk::new();
        sdk.fail_at(MockStep::Transfer);
        let (acquisition, _token, rx, worker) = start(&sdk);

        let err = worker.join().unwrap().unwrap_err();
        assert!(matches!(err, AcquisitionError::TransferCreate(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert!(sdk.stats().is_balanced());
    }

    #[test]
    fn test_unsupported_format_faults_the_epoch() {
        let sdk = MockSdk::new().with_resolution(4, 4);
        let (_acquisition, _token, rx, worker) = start(&sdk);
        assert!(sdk.wait_until_grabbing(WAIT));

        assert!(sdk.fire_end_of_frame());
        rx.recv_timeout(WAIT).unwrap();

        sdk.set_format(PixelFormat::Mono16);
        // The epoch ends on its own; no cancellation needed.
        sdk.fire_end_of_frame();
        let err = worker.join().unwrap().unwrap_err();
        assert_eq!(err, AcquisitionError::UnsupportedPixelFormat(PixelFormat::Mono16));
        assert!(rx.try_recv().is_err());
        assert!(sdk.stats().is_balanced());
    }

    #[test]
    fn test_rgb_frames_copy_three_bytes_per_pixel() {
        let sdk = MockSdk::new()
            .with_resolution(3, 2)
            .with_format(PixelFormat::Rgb888);
        let (_acquisition, token, rx, worker) = start(&sdk);
        assert!(sdk.wait_until_grabbing(WAIT));

        sdk.fire_end_of_frame();
        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.channels, 3);
        assert_eq!(frame.format, PixelFormat::Rgb888);
        assert_eq!(frame.data.len(), 3 * 2 * 3);
        assert_eq!(frame.pixel(1, 1), Some(&[2u8, 3, 4][..]));

        token.cancel();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_runs_are_serialized_by_capture_lock() {
        let sdk = MockSdk::new().with_teardown_delay(Duration::from_millis(50));
        let acquisition = Arc::new(AcquisitionLoop::new(
            Arc::new(sdk.clone()),
            DeviceIdentity::new(MOCK_SERVER, 0, "mock.ccf"),
        ));

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let acquisition = acquisition.clone();
                let token = CancellationToken::new();
                let canceller = token.clone();
                let handle = thread::spawn(move || {
                    let sink: Arc<dyn FrameSink> = Arc::new(|_frame: Frame| {});
                    acquisition.run(sink, &token)
                });
                (canceller, handle)
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        for (token, _) in &workers {
            token.cancel();
        }
        for (_, handle) in workers {
            handle.join().unwrap().unwrap();
        }

        let stats = sdk.stats();
        assert!(stats.is_balanced());
        assert_eq!(stats.max_live_devices, 1);
    }
}
