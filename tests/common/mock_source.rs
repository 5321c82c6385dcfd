//! Mock ChangeSource for testing.
//!
//! Serves a configurable snapshot, records every channel it opens and lets
//! tests push events and lifecycle signals into the latest channel.
//! Failures are injected per call (next N fetches / subscribes fail).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use table_sync_engine::source::{
    BoxFuture, Channel, ChannelRequest, ChannelSignal, ChannelSink, ChangeSource, SourceError,
};
use table_sync_engine::{ChangeEvent, Record};

/// Record type used across integration tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub title: String,
}

impl Item {
    pub fn new(id: u64, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
        }
    }
}

impl Record for Item {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }
}

/// Channel handle that counts closes.
struct MockChannel {
    closes: Arc<AtomicUsize>,
}

impl Channel for MockChannel {
    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock implementation of ChangeSource that records all calls.
///
/// # Example
/// ```rust,ignore
/// let source = MockSource::with_snapshot(vec![Item::new(1, "a")]);
/// source.fail_next_subscribes(2);
///
/// // Use in tests...
///
/// source.push(ChangeEvent::update("items", Item::new(1, "b")));
/// assert_eq!(source.open_count(), 3);
/// ```
pub struct MockSource {
    snapshot: Mutex<Vec<Item>>,
    /// Simulated query latency
    snapshot_delay: Mutex<Option<Duration>>,
    fetch_count: AtomicUsize,
    fail_fetches: AtomicUsize,

    /// Every sink handed out, oldest first
    sinks: Mutex<Vec<ChannelSink<Item>>>,
    requests: Mutex<Vec<ChannelRequest>>,
    open_count: AtomicUsize,
    fail_subscribes: AtomicUsize,
    fail_all_subscribes: AtomicBool,
    /// Send `Subscribed` right after opening
    auto_confirm: AtomicBool,
    closes: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::with_snapshot(Vec::new())
    }

    pub fn with_snapshot(rows: Vec<Item>) -> Self {
        Self {
            snapshot: Mutex::new(rows),
            snapshot_delay: Mutex::new(None),
            fetch_count: AtomicUsize::new(0),
            fail_fetches: AtomicUsize::new(0),
            sinks: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
            fail_subscribes: AtomicUsize::new(0),
            fail_all_subscribes: AtomicBool::new(false),
            auto_confirm: AtomicBool::new(true),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn set_snapshot(&self, rows: Vec<Item>) {
        *self.snapshot.lock() = rows;
    }

    pub fn set_snapshot_delay(&self, delay: Duration) {
        *self.snapshot_delay.lock() = Some(delay);
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_subscribes(&self, n: usize) {
        self.fail_subscribes.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_subscribes(&self, fail: bool) {
        self.fail_all_subscribes.store(fail, Ordering::SeqCst);
    }

    /// When false, channels open but never confirm.
    pub fn set_auto_confirm(&self, confirm: bool) {
        self.auto_confirm.store(confirm, Ordering::SeqCst);
    }

    // =========================================================================
    // Driving the stream
    // =========================================================================

    /// Deliver an event on the latest channel. Returns false if nobody listens.
    pub fn push(&self, event: ChangeEvent<Item>) -> bool {
        match self.sinks.lock().last() {
            Some(sink) => sink.send_event(event),
            None => false,
        }
    }

    /// Deliver a lifecycle signal on the latest channel.
    pub fn signal(&self, signal: ChannelSignal) -> bool {
        match self.sinks.lock().last() {
            Some(sink) => sink.signal(signal),
            None => false,
        }
    }

    /// Sink of the n-th opened channel (0-based).
    pub fn sink(&self, n: usize) -> Option<ChannelSink<Item>> {
        self.sinks.lock().get(n).cloned()
    }

    /// Drop every sink, as a transport that vanished without a signal.
    pub fn drop_sinks(&self) {
        self.sinks.lock().clear();
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Subscribe attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Channels currently open (opened and not yet closed).
    pub fn live_channels(&self) -> usize {
        self.sinks.lock().len().saturating_sub(self.close_count())
    }

    pub fn last_request(&self) -> Option<ChannelRequest> {
        self.requests.lock().last().cloned()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSource<Item> for MockSource {
    fn fetch_snapshot(&self, _resource: &str, _filter: Option<&str>) -> BoxFuture<'_, Vec<Item>> {
        Box::pin(async move {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            let delay = *self.snapshot_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if Self::take_failure(&self.fail_fetches) {
                return Err(SourceError("503 Service Unavailable".to_string()));
            }
            Ok(self.snapshot.lock().clone())
        })
    }

    fn subscribe_changes(
        &self,
        request: &ChannelRequest,
        sink: ChannelSink<Item>,
    ) -> BoxFuture<'_, Box<dyn Channel>> {
        let request = request.clone();
        Box::pin(async move {
            self.open_count.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request);

            if self.fail_all_subscribes.load(Ordering::SeqCst) || Self::take_failure(&self.fail_subscribes) {
                return Err(SourceError("connection refused".to_string()));
            }

            if self.auto_confirm.load(Ordering::SeqCst) {
                sink.signal(ChannelSignal::Subscribed);
            }
            self.sinks.lock().push(sink);

            Ok(Box::new(MockChannel {
                closes: Arc::clone(&self.closes),
            }) as Box<dyn Channel>)
        })
    }
}
