//! Event-driven simulation loop
//!
//! A min-heap priority queue processed in strict chronological order, with
//! pause/resume/step controls for interactive debugging. Multiple threads
//! may push events concurrently; exactly one thread may run the loop. The
//! enqueue path is the engine's only cross-thread synchronization point.
//!
//! Tie-break: events with equal timestamps pop in push order (each push is
//! stamped with a monotonic sequence number), stable across runs.

use crate::core_types::{SymbolId, Ticket};
use crate::market::Timeframe;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Condvar, Mutex};
use thiserror::Error;

/// Event loop errors
#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error("event loop is already running")]
    AlreadyRunning,

    #[error("operation requires a stopped event loop")]
    Running,
}

/// Event payload, inlined (no heap allocation per event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Tick {
        symbol_id: SymbolId,
        bid: i64,
        ask: i64,
    },
    BarClose {
        symbol_id: SymbolId,
        timeframe: Timeframe,
    },
    OrderTrigger {
        ticket: Ticket,
    },
    Timer {
        timer_id: u32,
    },
    Custom(u64),
}

/// A timestamped simulation event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub timestamp_us: i64,
    /// Push-order stamp; assigned by the queue, used only for the
    /// equal-timestamp tie-break.
    seq: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn tick(timestamp_us: i64, symbol_id: SymbolId, bid: i64, ask: i64) -> Self {
        Self {
            timestamp_us,
            seq: 0,
            kind: EventKind::Tick { symbol_id, bid, ask },
        }
    }

    pub fn bar_close(timestamp_us: i64, symbol_id: SymbolId, timeframe: Timeframe) -> Self {
        Self {
            timestamp_us,
            seq: 0,
            kind: EventKind::BarClose {
                symbol_id,
                timeframe,
            },
        }
    }

    pub fn order_trigger(timestamp_us: i64, ticket: Ticket) -> Self {
        Self {
            timestamp_us,
            seq: 0,
            kind: EventKind::OrderTrigger { ticket },
        }
    }

    pub fn timer(timestamp_us: i64, timer_id: u32) -> Self {
        Self {
            timestamp_us,
            seq: 0,
            kind: EventKind::Timer { timer_id },
        }
    }

    pub fn custom(timestamp_us: i64, data: u64) -> Self {
        Self {
            timestamp_us,
            seq: 0,
            kind: EventKind::Custom(data),
        }
    }
}

// Reverse ordering on (timestamp, seq) so BinaryHeap's max element is the
// earliest event.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp_us
            .cmp(&self.timestamp_us)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_us == other.timestamp_us && self.seq == other.seq
    }
}

impl Eq for Event {}

#[derive(Default)]
struct Inner {
    queue: BinaryHeap<Event>,
    next_seq: u64,
}

/// Priority-queue event pump with lifecycle controls.
///
/// `push`/`push_batch` are thread-safe and may be called while the loop is
/// running; `run`/`step` are exclusive (a second concurrent call fails with
/// `AlreadyRunning`).
pub struct EventLoop {
    inner: Mutex<Inner>,
    cv: Condvar,
    running: AtomicBool,
    paused: AtomicBool,
    stopped: AtomicBool,
    events_processed: AtomicU64,
    current_timestamp: AtomicI64,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cv: Condvar::new(),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            events_processed: AtomicU64::new(0),
            current_timestamp: AtomicI64::new(0),
        }
    }

    /// Enqueue one event. Wakes a paused or waiting `run`.
    pub fn push(&self, mut event: Event) {
        let mut inner = self.inner.lock().unwrap();
        event.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(event);
        drop(inner);
        self.cv.notify_one();
    }

    /// Enqueue many events under one lock acquisition.
    pub fn push_batch(&self, events: impl IntoIterator<Item = Event>) {
        let mut inner = self.inner.lock().unwrap();
        for mut event in events {
            event.seq = inner.next_seq;
            inner.next_seq += 1;
            inner.queue.push(event);
        }
        drop(inner);
        self.cv.notify_one();
    }

    /// Process events in timestamp order until the queue drains or `stop`
    /// is called. While paused, blocks on the condvar until `resume` or
    /// `stop`.
    pub fn run<F>(&self, mut handler: F) -> Result<(), EventLoopError>
    where
        F: FnMut(&Event),
    {
        if self.running.swap(true, AtomicOrdering::SeqCst) {
            return Err(EventLoopError::AlreadyRunning);
        }
        self.stopped.store(false, AtomicOrdering::SeqCst);
        self.events_processed.store(0, AtomicOrdering::SeqCst);

        loop {
            // Pause gate: wait between events until resumed or stopped.
            {
                let mut inner = self.inner.lock().unwrap();
                while self.paused.load(AtomicOrdering::SeqCst)
                    && !self.stopped.load(AtomicOrdering::SeqCst)
                {
                    inner = self.cv.wait(inner).unwrap();
                }
                drop(inner);
            }

            if self.stopped.load(AtomicOrdering::SeqCst) {
                break;
            }

            let event = {
                let mut inner = self.inner.lock().unwrap();
                match inner.queue.pop() {
                    Some(event) => event,
                    None => break,
                }
            };

            self.current_timestamp
                .store(event.timestamp_us, AtomicOrdering::SeqCst);
            handler(&event);
            self.events_processed.fetch_add(1, AtomicOrdering::SeqCst);
        }

        self.running.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    /// Process at most `n` events, then return the number processed.
    /// Ignores the pause flag (stepping is itself the manual gate).
    pub fn step<F>(&self, n: usize, mut handler: F) -> Result<u64, EventLoopError>
    where
        F: FnMut(&Event),
    {
        if self.running.swap(true, AtomicOrdering::SeqCst) {
            return Err(EventLoopError::AlreadyRunning);
        }
        self.stopped.store(false, AtomicOrdering::SeqCst);

        let mut processed = 0u64;
        for _ in 0..n {
            if self.stopped.load(AtomicOrdering::SeqCst) {
                break;
            }
            let event = {
                let mut inner = self.inner.lock().unwrap();
                match inner.queue.pop() {
                    Some(event) => event,
                    None => break,
                }
            };
            self.current_timestamp
                .store(event.timestamp_us, AtomicOrdering::SeqCst);
            handler(&event);
            processed += 1;
            self.events_processed.fetch_add(1, AtomicOrdering::SeqCst);
        }

        self.running.store(false, AtomicOrdering::SeqCst);
        Ok(processed)
    }

    /// Pause between events; the in-flight event completes first.
    pub fn pause(&self) {
        self.paused.store(true, AtomicOrdering::SeqCst);
    }

    /// Resume a paused loop.
    pub fn resume(&self) {
        self.paused.store(false, AtomicOrdering::SeqCst);
        self.cv.notify_all();
    }

    /// Terminate the current run after the in-flight event. Unprocessed
    /// events stay queued and a later `run` resumes them.
    pub fn stop(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        self.cv.notify_all();
    }

    /// Drop all queued events. Only legal while the loop is not running.
    pub fn clear(&self) -> Result<(), EventLoopError> {
        if self.running.load(AtomicOrdering::SeqCst) {
            return Err(EventLoopError::Running);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        self.events_processed.store(0, AtomicOrdering::SeqCst);
        self.current_timestamp.store(0, AtomicOrdering::SeqCst);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().queue.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(AtomicOrdering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }

    /// Successful handler invocations since the last `run` began.
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(AtomicOrdering::SeqCst)
    }

    /// Timestamp of the most recently dispatched event.
    pub fn current_timestamp(&self) -> i64 {
        self.current_timestamp.load(AtomicOrdering::SeqCst)
    }
}
