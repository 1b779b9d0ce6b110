//! Run bookkeeping: the global message history and per-node tallies.

use astrons_core::{Message, SimTime};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One hop of one message: recorded every time a node processes it.
#[derive(Debug, Clone)]
pub struct HopRecord {
    /// Virtual time at which processing started.
    pub time: SimTime,
    /// The same instant mapped onto the wall-clock epoch.
    pub datetime: DateTime<Utc>,
    /// Label of the emitting node (the processing node itself at origin).
    pub from: String,
    /// Label of the processing node.
    pub to: String,
    /// Copy of the message as received.
    pub message: Message,
    /// Reserve time R the node yielded for this step.
    pub reserve: f64,
    /// Emit delay until the outputs became visible downstream.
    pub total_delay: f64,
    /// Virtual seconds the message waited between emission and processing.
    pub wait: f64,
}

/// Message history for the whole run, keyed by message ID.
///
/// Iteration order is first-seen order, so artifact output is deterministic
/// and stable across runs with the same seed.
#[derive(Debug, Default)]
pub struct MessageHistory {
    order: Vec<String>,
    map: HashMap<String, Vec<HopRecord>>,
}

impl MessageHistory {
    pub fn new() -> Self {
        MessageHistory::default()
    }

    pub fn record(&mut self, id: &str, record: HopRecord) {
        match self.map.get_mut(id) {
            Some(hops) => hops.push(record),
            None => {
                self.order.push(id.to_string());
                self.map.insert(id.to_string(), vec![record]);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&[HopRecord]> {
        self.map.get(id).map(Vec::as_slice)
    }

    /// Iterate messages in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[HopRecord])> {
        self.order
            .iter()
            .map(move |id| (id.as_str(), self.map[id].as_slice()))
    }

    /// Number of distinct messages seen.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Total hop records across all messages.
    pub fn total_records(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }
}

/// Per-node accumulators, mirrored into parent meta-nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeTally {
    pub msgs_processed: u64,
    pub msg_ids: Vec<String>,
    pub time_received: Vec<f64>,
    pub wait_times: Vec<f64>,
    /// Reserve times R, one per recorded step output.
    pub delay_till_next: Vec<f64>,
    /// Emit delays, one per recorded step output.
    pub processing_times: Vec<f64>,
    pub data_sizes: Vec<f64>,
}

impl NodeTally {
    pub fn record(
        &mut self,
        msg_id: &str,
        time_sent: f64,
        wait: f64,
        reserve: f64,
        emit_delay: f64,
        size: f64,
    ) {
        self.msgs_processed += 1;
        self.msg_ids.push(msg_id.to_string());
        self.time_received.push(time_sent);
        self.wait_times.push(wait);
        self.delay_till_next.push(reserve);
        self.processing_times.push(emit_delay);
        self.data_sizes.push(size);
    }
}
