//! The virtual clock and pending-event heap.
//!
//! Events are keyed by `(time, sequence)`. The sequence number is a
//! monotonically increasing tiebreaker, so events scheduled for the same
//! virtual time fire in the order they were scheduled.

use crate::sim::NodeId;
use astrons_core::{Message, SimTime};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use thiserror::Error;

/// Scheduling errors. Both indicate a node or caller bug and are fatal.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("cannot schedule an event {0} seconds in the past")]
    NegativeDelay(f64),

    #[error("cannot schedule at t={at}, clock is already at {now}")]
    TimeInPast { at: SimTime, now: SimTime },
}

/// What happens when an event fires.
#[derive(Debug)]
pub enum EventPayload {
    /// The node's reserve window ended; it may take its next input (or, for
    /// a pure source, produce its next pulse).
    NodeReady(NodeId),
    /// A node's outputs become visible: stamp and route each message.
    Emit { node: NodeId, outputs: Vec<Message> },
    /// A timer scheduled by a node behavior fired.
    Timer { node: NodeId, token: u64 },
}

/// An event in the heap, ordered by `(time, seq)`.
#[derive(Debug)]
pub struct Scheduled {
    pub time: SimTime,
    pub seq: u64,
    pub payload: EventPayload,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Min-heap of pending events plus the monotonically advancing `now`.
pub struct EventQueue {
    now: SimTime,
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    stop: Arc<AtomicBool>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            now: SimTime::ZERO,
            heap: BinaryHeap::new(),
            seq: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn now_secs(&self) -> f64 {
        self.now.as_secs_f64()
    }

    /// Schedule `payload` to fire `delay` virtual seconds from now.
    pub fn schedule_after(&mut self, delay: f64, payload: EventPayload) -> Result<(), ClockError> {
        if delay < 0.0 || !delay.is_finite() {
            return Err(ClockError::NegativeDelay(delay));
        }
        self.push_at(self.now.add_secs(delay), payload);
        Ok(())
    }

    /// Schedule `payload` at absolute virtual time `at`.
    pub fn schedule_at(&mut self, at: SimTime, payload: EventPayload) -> Result<(), ClockError> {
        if at < self.now {
            return Err(ClockError::TimeInPast { at, now: self.now });
        }
        self.push_at(at, payload);
        Ok(())
    }

    fn push_at(&mut self, time: SimTime, payload: EventPayload) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Reverse(Scheduled { time, seq, payload }));
    }

    /// Next event's time without popping it.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|Reverse(ev)| ev.time)
    }

    /// Pop the next event if it fires at or before `horizon`, advancing `now`
    /// to its time. Events beyond the horizon stay queued.
    pub fn pop_before(&mut self, horizon: SimTime) -> Option<Scheduled> {
        match self.heap.peek() {
            Some(Reverse(ev)) if ev.time <= horizon => {}
            _ => return None,
        }
        let Reverse(ev) = self.heap.pop().expect("peeked event vanished");
        debug_assert!(ev.time >= self.now, "time went backwards");
        self.now = ev.time;
        Some(ev)
    }

    /// Advance `now` to the run horizon after the loop drains.
    pub fn finish_at(&mut self, horizon: SimTime) {
        if horizon != SimTime::MAX && horizon > self.now {
            self.now = horizon;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Shared handle for requesting a stop from signal handlers or other
    /// threads. Pending events are discarded when the loop observes it.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, AtomicOrdering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(AtomicOrdering::SeqCst)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new()
    }
}
