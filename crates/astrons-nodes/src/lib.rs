//! Built-in node kinds for the astroNS simulator.
//!
//! Every node here implements the [`astrons_engine::NodeBehavior`] protocol.
//! [`builtin`] lists the kinds reachable from network descriptions; the
//! channel adapters are programmatic-only and are handed pre-built to the
//! factory by whoever owns the external connection.

pub mod channel;
pub mod delays;
pub mod distrib;
pub mod flow;
pub mod gate;
pub mod geopoint;
pub mod mathis;
pub mod processor;
pub mod sinks;
pub mod sources;

pub use channel::{ChannelSink, ChannelSource};
pub use geopoint::GeoPoint;

use astrons_engine::NodeConstructor;

/// A node kind reachable from network descriptions.
pub struct BuiltinKind {
    /// Lowercased registry tag.
    pub tag: &'static str,
    /// Display name used in trace lines.
    pub kind: &'static str,
    pub construct: NodeConstructor,
}

/// All description-reachable node kinds, in registry order.
pub fn builtin() -> Vec<BuiltinKind> {
    vec![
        BuiltinKind {
            tag: "randomdatasource",
            kind: "RandomDataSource",
            construct: sources::random_data_source,
        },
        BuiltinKind {
            tag: "filedatasource",
            kind: "FileDataSource",
            construct: sources::file_data_source,
        },
        BuiltinKind {
            tag: "positionreport",
            kind: "PositionReport",
            construct: sources::position_report,
        },
        BuiltinKind {
            tag: "sink",
            kind: "Sink",
            construct: sinks::sink,
        },
        BuiltinKind {
            tag: "delaysize",
            kind: "DelaySize",
            construct: delays::delay_size,
        },
        BuiltinKind {
            tag: "delaytime",
            kind: "DelayTime",
            construct: delays::delay_time,
        },
        BuiltinKind {
            tag: "keydelaytime",
            kind: "KeyDelayTime",
            construct: delays::key_delay_time,
        },
        BuiltinKind {
            tag: "processor",
            kind: "Processor",
            construct: processor::processor,
        },
        BuiltinKind {
            tag: "mathisdelay",
            kind: "MathisDelay",
            construct: mathis::mathis_delay,
        },
        BuiltinKind {
            tag: "andgate",
            kind: "AndGate",
            construct: gate::and_gate,
        },
        BuiltinKind {
            tag: "combiner",
            kind: "Combiner",
            construct: flow::combiner,
        },
        BuiltinKind {
            tag: "minimizer",
            kind: "Minimizer",
            construct: flow::minimizer,
        },
        BuiltinKind {
            tag: "partitioner",
            kind: "Partitioner",
            construct: flow::partitioner,
        },
        BuiltinKind {
            tag: "addkeyvalue",
            kind: "AddKeyValue",
            construct: flow::add_key_value,
        },
        BuiltinKind {
            tag: "randomdistrib",
            kind: "RandomDistrib",
            construct: distrib::random_distrib,
        },
    ]
}
