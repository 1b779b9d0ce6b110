//! Real-time pacing.
//!
//! When enabled, the event loop sleeps between events so that virtual time
//! tracks wall-clock time scaled by a factor. In strict mode, falling behind
//! the wall clock by more than the catch-up allowance aborts the run; in
//! permissive mode it logs a rate-limited warning.

use astrons_core::SimTime;
use std::time::{Duration, Instant};

/// Real-time mode configuration.
#[derive(Debug, Clone)]
pub struct RealTimeConfig {
    /// Virtual seconds per wall second (1.0 = real time, 2.0 = twice as fast).
    pub factor: f64,
    /// Abort (strict) instead of warning when the simulation falls behind.
    pub strict: bool,
    /// Allowed lag before an overrun is reported, in milliseconds.
    pub max_catchup_ms: u64,
    /// Minimum interval between lag warnings, in milliseconds.
    pub lag_warn_interval_ms: u64,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        RealTimeConfig {
            factor: 1.0,
            strict: false,
            max_catchup_ms: 100,
            lag_warn_interval_ms: 5000,
        }
    }
}

impl RealTimeConfig {
    pub fn with_factor(factor: f64) -> Self {
        assert!(factor > 0.0, "real-time factor must be positive");
        RealTimeConfig {
            factor,
            ..Default::default()
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Tracks wall-clock vs virtual-time drift during a paced run.
#[derive(Debug)]
pub struct RealTimePacer {
    config: RealTimeConfig,
    start_wall: Instant,
    start_sim: SimTime,
    last_lag_warn: Instant,
    max_drift_seen_ms: i64,
}

impl RealTimePacer {
    pub fn new(config: RealTimeConfig, start_sim: SimTime) -> Self {
        let now = Instant::now();
        RealTimePacer {
            config,
            start_wall: now,
            start_sim,
            // Primed in the past so the first overrun can warn immediately.
            last_lag_warn: now.checked_sub(Duration::from_secs(3600)).unwrap_or(now),
            max_drift_seen_ms: 0,
        }
    }

    pub fn config(&self) -> &RealTimeConfig {
        &self.config
    }

    /// The virtual time the simulation should have reached by now.
    pub fn target_sim_time(&self) -> SimTime {
        let elapsed = self.start_wall.elapsed().as_secs_f64() * self.config.factor;
        self.start_sim.add_secs(elapsed)
    }

    /// Drift in milliseconds; positive means the simulation is behind.
    pub fn drift_ms(&self, current: SimTime) -> i64 {
        let target = self.target_sim_time().as_micros() as i64;
        (target - current.as_micros() as i64) / 1000
    }

    /// How long to sleep before `next_event_time` is due, or `None` to run
    /// it immediately.
    pub fn sleep_until_event(&self, next_event_time: SimTime) -> Option<Duration> {
        let target = self.target_sim_time();
        if next_event_time <= target {
            return None;
        }
        let ahead_us = next_event_time.saturating_sub(target);
        let wall_us = (ahead_us as f64 / self.config.factor) as u64;
        Some(Duration::from_micros(wall_us))
    }

    /// Check for an overrun at `current`. Returns the drift when it exceeds
    /// the allowance and the warning interval permits reporting it.
    pub fn check_overrun(&mut self, current: SimTime) -> Option<i64> {
        let drift = self.drift_ms(current);
        if drift > self.max_drift_seen_ms {
            self.max_drift_seen_ms = drift;
        }
        if drift <= self.config.max_catchup_ms as i64 {
            return None;
        }
        // Strict runs abort on the first overrun; don't rate-limit those.
        if self.config.strict {
            return Some(drift);
        }
        let now = Instant::now();
        if now.duration_since(self.last_lag_warn).as_millis()
            >= self.config.lag_warn_interval_ms as u128
        {
            self.last_lag_warn = now;
            Some(drift)
        } else {
            None
        }
    }

    pub fn max_drift_seen_ms(&self) -> i64 {
        self.max_drift_seen_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RealTimeConfig::default();
        assert_eq!(config.factor, 1.0);
        assert!(!config.strict);
    }

    #[test]
    #[should_panic(expected = "real-time factor must be positive")]
    fn test_invalid_factor() {
        RealTimeConfig::with_factor(0.0);
    }

    #[test]
    fn test_future_event_requires_sleep() {
        let pacer = RealTimePacer::new(RealTimeConfig::with_factor(1.0), SimTime::ZERO);
        let sleep = pacer.sleep_until_event(SimTime::from_secs(30.0));
        assert!(sleep.is_some());
        assert!(sleep.unwrap() > Duration::from_secs(25));
    }

    #[test]
    fn test_past_event_runs_immediately() {
        let pacer = RealTimePacer::new(RealTimeConfig::with_factor(1000.0), SimTime::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(pacer.sleep_until_event(SimTime::from_secs(1.0)).is_none());
    }

    #[test]
    fn test_overrun_detected_when_behind() {
        let config = RealTimeConfig {
            factor: 1000.0,
            max_catchup_ms: 0,
            ..Default::default()
        };
        let mut pacer = RealTimePacer::new(config, SimTime::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(pacer.check_overrun(SimTime::ZERO).is_some());
        assert!(pacer.max_drift_seen_ms() > 0);
    }
}
