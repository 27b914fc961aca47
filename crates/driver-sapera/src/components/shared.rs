//! Reference-counted, reconnectable source.
//!
//! [`SharedSource`] turns a blocking producer function into a live feed that
//! any number of subscribers can attach to:
//!
//! - **Cold**: nothing runs until the first [`Subscription`] exists.
//! - **Hot**: the first subscriber starts one worker thread (an *epoch*); later
//!   subscribers join the same epoch and see items from the moment they attach.
//! - **Reference counted**: dropping the last subscription cancels the epoch's
//!   [`CancellationToken`].
//! - **Reconnectable**: the next subscriber after that starts a new epoch, i.e.
//!   the producer is called again from scratch. Nothing is replayed.
//!
//! Each subscriber has a one-slot channel and the publisher blocks on it, so a
//! slow subscriber slows the producer instead of growing a queue.
//!
//! When the producer returns an error, every subscriber of that epoch receives
//! it as its last item and the source goes back to idle.

use crate::components::signal::CancellationToken;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Item delivered to subscribers.
pub type SharedItem<T, E> = Result<Arc<T>, E>;

type Producer<T, E> = dyn Fn(Publisher<T, E>, CancellationToken) -> Result<(), E> + Send + Sync;

/// The worker thread for an epoch could not be created.
#[derive(Debug)]
pub struct SpawnError(pub std::io::Error);

impl From<SpawnError> for frame_core::AcquisitionError {
    fn from(e: SpawnError) -> Self {
        frame_core::AcquisitionError::WorkerSpawn(e.0.to_string())
    }
}

struct SourceState<T, E> {
    /// Bumped whenever an epoch ends (last unsubscribe or producer exit).
    epoch: u64,
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<SharedItem<T, E>>>,
    /// Present while the current epoch's worker should be running.
    token: Option<CancellationToken>,
    epochs_started: u64,
}

struct SharedInner<T, E> {
    name: String,
    producer: Box<Producer<T, E>>,
    state: Mutex<SourceState<T, E>>,
}

/// A shareable, restartable feed driven by a blocking producer.
pub struct SharedSource<T, E> {
    inner: Arc<SharedInner<T, E>>,
}

impl<T, E> Clone for SharedSource<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> SharedSource<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + 'static + From<SpawnError>,
{
    /// Create a cold source. `name` labels the worker threads.
    ///
    /// `producer` runs on a dedicated thread once per epoch. It must return
    /// soon after its token is cancelled.
    pub fn new<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn(Publisher<T, E>, CancellationToken) -> Result<(), E> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SharedInner {
                name: name.into(),
                producer: Box::new(producer),
                state: Mutex::new(SourceState {
                    epoch: 0,
                    next_id: 0,
                    subscribers: HashMap::new(),
                    token: None,
                    epochs_started: 0,
                }),
            }),
        }
    }

    /// Attach a subscriber, starting an epoch if none is running.
    pub fn subscribe(&self) -> Subscription<T, E> {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.inner.state.lock();

        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, tx);
        let epoch = state.epoch;

        if state.token.is_none() {
            let token = CancellationToken::new();
            state.token = Some(token.clone());
            state.epochs_started += 1;
            tracing::debug!(source = %self.inner.name, epoch, "Starting epoch");

            if let Err(e) = self.spawn_worker(epoch, token) {
                tracing::error!(source = %self.inner.name, error = %e.0, "Failed to spawn worker");
                let subscribers = Self::end_epoch(&mut state);
                drop(state);
                let error = E::from(e);
                for tx in subscribers.into_values() {
                    let _ = tx.try_send(Err(error.clone()));
                }
            }
        }

        Subscription {
            rx,
            id,
            epoch,
            source: self.inner.clone(),
        }
    }

    /// Number of subscribers attached to the current epoch.
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers.len()
    }

    /// Whether an epoch is currently live.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().token.is_some()
    }

    /// Epochs started since creation.
    pub fn epochs_started(&self) -> u64 {
        self.inner.state.lock().epochs_started
    }

    fn spawn_worker(&self, epoch: u64, token: CancellationToken) -> Result<(), SpawnError> {
        let inner = self.inner.clone();
        std::thread::Builder::new()
            .name(format!("{}-epoch-{}", self.inner.name, epoch))
            .spawn(move || {
                let publisher = Publisher {
                    source: inner.clone(),
                    epoch,
                };
                let result = (inner.producer)(publisher, token);

                let mut state = inner.state.lock();
                if state.epoch != epoch {
                    // Every subscriber already left; a newer epoch may be live.
                    return;
                }
                let subscribers = Self::end_epoch(&mut state);
                drop(state);

                match result {
                    Ok(()) => tracing::debug!(source = %inner.name, epoch, "Epoch completed"),
                    Err(error) => {
                        tracing::debug!(
                            source = %inner.name,
                            epoch,
                            subscribers = subscribers.len(),
                            "Epoch failed, notifying subscribers"
                        );
                        for tx in subscribers.into_values() {
                            let _ = tx.blocking_send(Err(error.clone()));
                        }
                    }
                }
            })
            .map(|_| ())
            .map_err(SpawnError)
    }

    fn end_epoch(
        state: &mut SourceState<T, E>,
    ) -> HashMap<u64, mpsc::Sender<SharedItem<T, E>>> {
        state.epoch += 1;
        state.token = None;
        std::mem::take(&mut state.subscribers)
    }
}

/// Handle given to the producer for pushing items to the epoch's subscribers.
pub struct Publisher<T, E> {
    source: Arc<SharedInner<T, E>>,
    epoch: u64,
}

impl<T, E> Publisher<T, E> {
    /// Deliver `item` to every subscriber attached right now.
    ///
    /// Blocks while any subscriber's slot is full. Must not be called from
    /// an async context.
    pub fn publish(&self, item: T) {
        let targets: Vec<_> = {
            let state = self.source.state.lock();
            if state.epoch != self.epoch {
                return;
            }
            state.subscribers.values().cloned().collect()
        };
        let item = Arc::new(item);
        for tx in targets {
            // A closed channel means that subscriber detached meanwhile.
            let _ = tx.blocking_send(Ok(item.clone()));
        }
    }
}

/// One consumer's attachment to a [`SharedSource`].
///
/// Ends (`None`) when the epoch ends; an epoch failure is delivered as a final
/// `Err` item. Dropping the last subscription of an epoch cancels it.
pub struct Subscription<T, E> {
    rx: mpsc::Receiver<SharedItem<T, E>>,
    id: u64,
    epoch: u64,
    source: Arc<SharedInner<T, E>>,
}

impl<T, E> Subscription<T, E> {
    /// Receive the next item.
    pub async fn recv(&mut self) -> Option<SharedItem<T, E>> {
        self.rx.recv().await
    }

    /// Receive the next item, blocking the current thread.
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<SharedItem<T, E>> {
        self.rx.blocking_recv()
    }
}

impl<T, E> Stream for Subscription<T, E> {
    type Item = SharedItem<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T, E> Drop for Subscription<T, E> {
    fn drop(&mut self) {
        let mut state = self.source.state.lock();
        if state.epoch != self.epoch || state.subscribers.remove(&self.id).is_none() {
            return;
        }
        if state.subscribers.is_empty() {
            if let Some(token) = state.token.take() {
                tracing::debug!(source = %self.source.name, epoch = self.epoch, "Last subscriber left, cancelling epoch");
                token.cancel();
            }
            state.epoch += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::signal::AutoResetEvent;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Boom,
        Spawn,
    }

    impl From<SpawnError> for TestError {
        fn from(_: SpawnError) -> Self {
            TestError::Spawn
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Publishes 0, 1, 2, ... whenever `tick` is set, until cancelled.
    fn ticking_source(
        tick: Arc<AutoResetEvent>,
        starts: Arc<AtomicUsize>,
    ) -> SharedSource<u32, TestError> {
        SharedSource::new("ticker", move |publisher, token: CancellationToken| {
            starts.fetch_add(1, Ordering::SeqCst);
            let mut n = 0;
            while !token.is_cancelled() {
                if tick.wait_timeout(Duration::from_millis(5)) {
                    publisher.publish(n);
                    n += 1;
                }
            }
            Ok(())
        })
    }

    #[test]
    fn test_cold_until_first_subscriber() {
        let starts = Arc::new(AtomicUsize::new(0));
        let source = ticking_source(Arc::default(), starts.clone());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert!(!source.is_connected());

        let _sub = source.subscribe();
        wait_for(|| starts.load(Ordering::SeqCst) == 1);
        assert!(source.is_connected());
    }

    #[test]
    fn test_subscribers_share_one_epoch() {
        let tick = Arc::new(AutoResetEvent::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let source = ticking_source(tick.clone(), starts.clone());

        let mut a = source.subscribe();
        let mut b = source.subscribe();
        assert_eq!(source.subscriber_count(), 2);
        wait_for(|| starts.load(Ordering::SeqCst) == 1);

        tick.set();
        assert_eq!(*a.blocking_recv().unwrap().unwrap(), 0);
        assert_eq!(*b.blocking_recv().unwrap().unwrap(), 0);
        assert_eq!(source.epochs_started(), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_drop_cancels_and_next_subscribe_restarts() {
        let starts = Arc::new(AtomicUsize::new(0));
        let source = ticking_source(Arc::default(), starts.clone());

        let a = source.subscribe();
        let b = source.subscribe();
        drop(a);
        assert!(source.is_connected(), "one subscriber still attached");
        drop(b);
        assert!(!source.is_connected());
        assert_eq!(source.subscriber_count(), 0);

        let _c = source.subscribe();
        wait_for(|| starts.load(Ordering::SeqCst) == 2);
        assert_eq!(source.epochs_started(), 2);
    }

    #[test]
    fn test_error_reaches_every_subscriber_then_streams_end() {
        let release = Arc::new(AutoResetEvent::new());
        let source: SharedSource<u32, TestError> = SharedSource::new("failing", {
            let release = release.clone();
            move |_publisher, _token| {
                release.wait();
                Err(TestError::Boom)
            }
        });

        let mut a = source.subscribe();
        let mut b = source.subscribe();
        release.set();

        assert_eq!(a.blocking_recv(), Some(Err(TestError::Boom)));
        assert_eq!(b.blocking_recv(), Some(Err(TestError::Boom)));
        assert_eq!(a.blocking_recv(), None);
        assert_eq!(b.blocking_recv(), None);
        assert!(!source.is_connected());

        // Stale subscriptions must not disturb the next epoch.
        let _c = source.subscribe();
        drop(a);
        drop(b);
        assert!(source.is_connected());
        assert_eq!(source.epochs_started(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscription_is_a_stream() {
        let tick = Arc::new(AutoResetEvent::new());
        let source = ticking_source(tick.clone(), Arc::default());
        let sub = source.subscribe();

        let ticker = std::thread::spawn(move || {
            for _ in 0..3 {
                tick.set();
                std::thread::sleep(Duration::from_millis(20));
            }
        });

        let items: Vec<u32> = tokio::time::timeout(
            Duration::from_secs(5),
            sub.take(3).map(|item| *item.unwrap()).collect(),
        )
        .await
        .unwrap();
        assert_eq!(items, vec![0, 1, 2]);
        ticker.join().unwrap();
    }
}
