//! Common types and traits for the astroNS simulator.
//!
//! This crate holds everything the engine, the node implementations, and the
//! network loader agree on:
//!
//! - [`SimTime`]: the virtual clock's time type
//! - [`AttrValue`] / [`Message`]: the open attribute-bag message envelope
//! - [`Predicate`]: the compiled routing predicate language
//! - [`Propagator`]: the positional-model boundary trait for meta-nodes

pub mod config;
pub mod message;
pub mod predicate;
pub mod propagator;
pub mod time;
pub mod value;

pub use config::Config;
pub use message::{keys, Message};
pub use predicate::{Field, Predicate, PredicateError};
pub use propagator::{Geodetic, Propagator, StateVector};
pub use time::SimTime;
pub use value::AttrValue;

/// Sentinel reserve-time value a node yields to terminate itself
/// cooperatively. Mirrored in textual configurations, hence a value rather
/// than an enum variant.
pub const STOP_SIGNAL: f64 = 999_999.42;
