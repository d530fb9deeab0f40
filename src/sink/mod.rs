//! Output sinks.
//!
//! Each sink is an independent consumer of the frame or event stream,
//! running on its own thread behind a bounded hand-off queue. A slow or
//! failed sink drops or lags; it never blocks the pipeline or other sinks.
//!
//! Backpressure policy per queue:
//! - `DropOldest` (default for live sinks): a full queue discards its oldest
//!   item to admit the new one. Drops are counted and logged.
//! - `Block`: the producer waits for space. Used by the persistence sink
//!   when guaranteed capture is configured; this is the one deliberate way
//!   a sink can stall the pipeline.
//!
//! Receivers use timed waits, so a cancelled sink exits within a bounded
//! grace period even when nothing arrives.

mod record;
mod stream;

pub use record::spawn_record_sink;
pub use stream::{spawn_stream_sink, StreamSinkConfig};

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::CancelToken;

/// What a full queue does with a new item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued item. The sink sees a gap, never stale data.
    #[default]
    DropOldest,
    /// Block the producer until the sink catches up.
    Block,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
    space: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    name: String,
    drop_level: log::Level,
}

/// Producer half of a sink queue. Dropping it closes the queue.
pub struct SinkSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half, owned by the sink thread.
pub struct SinkReceiver<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) enum Recv<T> {
    Item(T),
    Empty,
    Closed,
}

/// Bounded hand-off queue between the pipeline and one sink.
pub fn bounded<T>(
    name: impl Into<String>,
    capacity: usize,
    policy: OverflowPolicy,
    drop_level: log::Level,
) -> (SinkSender<T>, SinkReceiver<T>) {
    assert!(capacity > 0, "sink queue capacity must be at least 1");
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            items: VecDeque::with_capacity(capacity),
            closed: false,
            dropped: 0,
        }),
        ready: Condvar::new(),
        space: Condvar::new(),
        capacity,
        policy,
        name: name.into(),
        drop_level,
    });
    (
        SinkSender {
            shared: shared.clone(),
        },
        SinkReceiver { shared },
    )
}

impl<T> SinkSender<T> {
    /// Hand an item to the sink. Returns false if the item was dropped
    /// (queue closed, or overflow under `DropOldest`).
    pub fn send(&self, item: T) -> bool {
        let mut state = self.shared.state.lock().expect("sink queue poisoned");
        if state.closed {
            return false;
        }
        match self.shared.policy {
            OverflowPolicy::DropOldest => {
                if state.items.len() == self.shared.capacity {
                    state.items.pop_front();
                    state.dropped += 1;
                    log::log!(
                        self.shared.drop_level,
                        "{} sink lagging; dropped oldest item ({} total)",
                        self.shared.name,
                        state.dropped
                    );
                }
                state.items.push_back(item);
            }
            OverflowPolicy::Block => {
                while state.items.len() == self.shared.capacity && !state.closed {
                    state = self
                        .shared
                        .space
                        .wait(state)
                        .expect("sink queue poisoned");
                }
                if state.closed {
                    return false;
                }
                state.items.push_back(item);
            }
        }
        self.shared.ready.notify_one();
        true
    }

    /// Close the queue. The receiver drains what is queued, then stops.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().expect("sink queue poisoned");
        state.closed = true;
        self.shared.ready.notify_all();
        self.shared.space.notify_all();
    }
}

impl<T> Drop for SinkSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> SinkReceiver<T> {
    /// Wait up to `wait` for the next item. A cancelled token stops the sink
    /// without draining; a closed queue drains, then reports `Closed`.
    pub(crate) fn recv_deadline(&self, cancel: &CancelToken, wait: Duration) -> Recv<T> {
        let mut state = self.shared.state.lock().expect("sink queue poisoned");
        if cancel.is_cancelled() {
            return Recv::Closed;
        }
        if let Some(item) = state.items.pop_front() {
            self.shared.space.notify_one();
            return Recv::Item(item);
        }
        if state.closed {
            return Recv::Closed;
        }
        let (mut state, _timeout) = self
            .shared
            .ready
            .wait_timeout(state, wait)
            .expect("sink queue poisoned");
        if cancel.is_cancelled() {
            return Recv::Closed;
        }
        if let Some(item) = state.items.pop_front() {
            self.shared.space.notify_one();
            return Recv::Item(item);
        }
        if state.closed {
            Recv::Closed
        } else {
            Recv::Empty
        }
    }

    /// Block until the next item, queue close, or cancellation.
    pub(crate) fn recv(&self, cancel: &CancelToken) -> Option<T> {
        loop {
            match self.recv_deadline(cancel, Duration::from_millis(100)) {
                Recv::Item(item) => return Some(item),
                Recv::Empty => continue,
                Recv::Closed => return None,
            }
        }
    }
}

impl<T> Drop for SinkReceiver<T> {
    fn drop(&mut self) {
        // A vanished consumer must not wedge a blocking producer.
        let mut state = self.shared.state.lock().expect("sink queue poisoned");
        state.closed = true;
        self.shared.space.notify_all();
        self.shared.ready.notify_all();
    }
}

/// Handle to a running sink thread.
///
/// The thread exits when its queue is closed and drained, or when the
/// cancel token it was spawned with fires. `stop` only joins; cancel the
/// token first for a fast abort.
pub struct SinkHandle {
    name: String,
    join: Option<JoinHandle<()>>,
}

impl SinkHandle {
    pub(crate) fn new(name: impl Into<String>, join: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            join: Some(join),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the sink thread.
    pub fn stop(mut self) {
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("{} sink thread panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_oldest_keeps_newest_items() {
        let (tx, rx) = bounded("test", 2, OverflowPolicy::DropOldest, log::Level::Debug);
        let cancel = CancelToken::new();
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert!(tx.send(3)); // overflows; 1 is dropped
        tx.close();

        assert_eq!(rx.recv(&cancel), Some(2));
        assert_eq!(rx.recv(&cancel), Some(3));
        assert_eq!(rx.recv(&cancel), None);
    }

    #[test]
    fn closed_queue_drains_then_stops() {
        let (tx, rx) = bounded("test", 4, OverflowPolicy::Block, log::Level::Warn);
        let cancel = CancelToken::new();
        assert!(tx.send("a"));
        assert!(tx.send("b"));
        drop(tx); // closes

        assert_eq!(rx.recv(&cancel), Some("a"));
        assert_eq!(rx.recv(&cancel), Some("b"));
        assert_eq!(rx.recv(&cancel), None);
    }

    #[test]
    fn send_after_close_reports_drop() {
        let (tx, rx) = bounded("test", 2, OverflowPolicy::DropOldest, log::Level::Debug);
        tx.close();
        assert!(!tx.send(1));
        drop(rx);
    }

    #[test]
    fn blocking_producer_unblocks_when_receiver_vanishes() {
        let (tx, rx) = bounded("test", 1, OverflowPolicy::Block, log::Level::Warn);
        assert!(tx.send(1));
        drop(rx); // closes the queue
        // Queue is full, but the closed flag makes this return instead of
        // waiting forever.
        assert!(!tx.send(2));
    }

    #[test]
    fn cancelled_receiver_stops_without_draining() {
        let (tx, rx) = bounded("test", 4, OverflowPolicy::DropOldest, log::Level::Debug);
        let cancel = CancelToken::new();
        assert!(tx.send(1));
        cancel.cancel();
        assert_eq!(rx.recv(&cancel), None);
        drop(tx);
    }
}
