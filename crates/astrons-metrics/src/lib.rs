//! Metric declarations for the astroNS simulator.
//!
//! Re-exports the `metrics` facade and declares every metric the engine and
//! runner emit as a structured [`Metric`] constant, so call sites never spell
//! a metric name twice and descriptions register in one place.
//!
//! ```rust,ignore
//! use astrons_metrics::{describe_metrics, metric_defs, metrics};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::EVENTS_PROCESSED.name).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric declaration: name, kind, description, unit and expected labels.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description)
            }
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the simulator.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Scheduler events popped and executed.
    pub const EVENTS_PROCESSED: Metric = Metric::counter("astrons.engine.events_processed")
        .with_description("Scheduler events popped and executed")
        .with_unit(Unit::Count);

    /// Node steps driven (one input consumed or one source pulse).
    pub const NODE_STEPS: Metric = Metric::counter("astrons.engine.node_steps")
        .with_description("Node generator steps driven")
        .with_unit(Unit::Count)
        .with_labels(&["node"]);

    /// Messages deposited into downstream pipes by the router.
    pub const MESSAGES_ROUTED: Metric = Metric::counter("astrons.router.messages_routed")
        .with_description("Messages deposited into downstream pipes")
        .with_unit(Unit::Count);

    /// Message copies that matched zero routing targets.
    pub const MESSAGES_TERMINATED: Metric = Metric::counter("astrons.router.messages_terminated")
        .with_description("Message copies that matched zero routing targets")
        .with_unit(Unit::Count);

    /// Payload volume carried through the router.
    pub const DATA_ROUTED_MBITS: Metric = Metric::counter("astrons.router.data_mbits")
        .with_description("Payload volume carried through the router")
        .with_unit(Unit::Count);

    /// Depth of the pending-event heap, sampled per pop.
    pub const EVENT_QUEUE_DEPTH: Metric = Metric::gauge("astrons.engine.event_queue_depth")
        .with_description("Depth of the pending-event heap");

    /// Per-message wait between enqueue and processing, in sim seconds.
    pub const MESSAGE_WAIT_SECONDS: Metric = Metric::histogram("astrons.node.wait_seconds")
        .with_description("Virtual seconds a message waited in an input pipe")
        .with_unit(Unit::Seconds)
        .with_labels(&["node"]);

    /// Everything above, for bulk registration.
    pub const ALL: &[&Metric] = &[
        &EVENTS_PROCESSED,
        &NODE_STEPS,
        &MESSAGES_ROUTED,
        &MESSAGES_TERMINATED,
        &DATA_ROUTED_MBITS,
        &EVENT_QUEUE_DEPTH,
        &MESSAGE_WAIT_SECONDS,
    ];
}

/// Register descriptions for every metric the simulator emits.
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_builder() {
        const M: Metric = Metric::counter("astrons.test")
            .with_description("test")
            .with_unit(Unit::Count)
            .with_labels(&["node"]);
        assert_eq!(M.name, "astrons.test");
        assert_eq!(M.kind, MetricKind::Counter);
        assert_eq!(M.labels, &["node"]);
    }

    #[test]
    fn test_describe_without_recorder_is_noop() {
        describe_metrics();
    }
}
