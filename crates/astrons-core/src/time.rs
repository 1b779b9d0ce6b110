//! Simulation time.
//!
//! Virtual time is kept in whole microseconds so that event ordering is exact
//! and heap comparisons never hit float edge cases. Node-facing APIs speak
//! f64 seconds (the unit of the network descriptions) and convert at the
//! boundary.

use serde::{Deserialize, Serialize};

/// A point in virtual time, in microseconds since simulation start.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SimTime(u64);

impl SimTime {
    /// Virtual time zero.
    pub const ZERO: SimTime = SimTime(0);

    /// Largest representable time; used as the "run forever" horizon.
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Convert from seconds, rounding to the nearest microsecond.
    /// Negative and non-finite inputs saturate to zero.
    pub fn from_secs(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return SimTime(0);
        }
        SimTime((secs * 1_000_000.0).round() as u64)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Advance by a duration given in seconds (saturating).
    pub fn add_secs(self, secs: f64) -> Self {
        SimTime(self.0.saturating_add(SimTime::from_secs(secs).0))
    }

    pub fn saturating_sub(self, earlier: SimTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}
