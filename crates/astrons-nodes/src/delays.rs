//! Delay nodes: size-proportional, fixed, and key-driven.

use astrons_core::Message;
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};
use chrono::{DateTime, Utc};

/// Delays each message by `size / rate_per_mbit` and reserves the node for
/// the same duration.
#[derive(Debug)]
pub struct DelaySize {
    rate_per_mbit: Param,
}

pub fn delay_size(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(DelaySize {
        rate_per_mbit: spec.param_f64("rate_per_mbit", 100.0),
    })))
}

impl NodeBehavior for DelaySize {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let rate = self.rate_per_mbit.get(ctx);
        if rate <= 0.0 {
            return Err(NodeError::new(ctx.label(), "rate_per_mbit must be positive"));
        }
        let size = msg.size(ctx.size_key());
        let delay = size / rate;
        ctx.trace(
            msg.id(),
            &format!(
                "Data size of |{}| arrived at |{}|. Processing took |{}| simtime units",
                size,
                ctx.now_secs(),
                delay
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}

/// Delays each message by a fixed `time_delay`.
#[derive(Debug)]
pub struct DelayTime {
    time_delay: Param,
}

pub fn delay_time(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(DelayTime {
        time_delay: spec.param_f64("time_delay", 0.01),
    })))
}

impl NodeBehavior for DelayTime {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let delay = self.time_delay.get(ctx);
        ctx.trace(
            msg.id(),
            &format!(
                "Data ID |{}| arrived at |{}|. Delay set to |{}| simtime units",
                msg.id(),
                ctx.now_secs(),
                delay
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}

/// Holds each message until the absolute simulation time carried in one of
/// its keys. The key may hold sim seconds directly, a Unix timestamp, or an
/// ISO-8601 datetime; the latter two are mapped through the epoch.
#[derive(Debug)]
pub struct KeyDelayTime {
    delay_key: String,
    convert_unix_time: bool,
    convert_iso_datetime: bool,
}

pub fn key_delay_time(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(KeyDelayTime {
        delay_key: spec
            .config
            .str("delay_key")
            .unwrap_or("key")
            .to_string(),
        convert_unix_time: spec.config.flag("convert_unix_time").unwrap_or(false),
        convert_iso_datetime: spec.config.flag("convert_iso_datetime").unwrap_or(false),
    })))
}

impl KeyDelayTime {
    fn target_sim_time(&self, ctx: &NodeCtx<'_>, msg: &Message) -> Result<f64, String> {
        let value = msg
            .get(&self.delay_key)
            .ok_or_else(|| format!("key '{}' not present in message", self.delay_key))?;

        if self.convert_unix_time {
            let unix = value
                .to_number()
                .ok_or_else(|| format!("key '{}' is not a Unix timestamp", self.delay_key))?;
            let datetime = DateTime::<Utc>::from_timestamp_micros((unix * 1e6) as i64)
                .ok_or_else(|| format!("Unix timestamp {} out of range", unix))?;
            Ok((datetime - ctx.epoch()).num_microseconds().unwrap_or(0) as f64 / 1e6)
        } else if self.convert_iso_datetime {
            let text = value.to_string();
            let datetime = DateTime::parse_from_rfc3339(&text)
                .map_err(|e| format!("key '{}' is not an ISO datetime: {}", self.delay_key, e))?
                .with_timezone(&Utc);
            Ok((datetime - ctx.epoch()).num_microseconds().unwrap_or(0) as f64 / 1e6)
        } else {
            value
                .to_number()
                .ok_or_else(|| format!("key '{}' is not numeric", self.delay_key))
        }
    }
}

impl NodeBehavior for KeyDelayTime {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let mut delay = match self.target_sim_time(ctx, &msg) {
            Ok(target) => target - ctx.now_secs(),
            Err(reason) => {
                ctx.trace(msg.id(), &format!("Error calculating delay: {}", reason));
                0.0
            }
        };
        if delay < 0.0 {
            ctx.trace(
                msg.id(),
                &format!(
                    "WARNING: Calculated delay is negative ({:.2}), current sim time is {:.2}",
                    delay,
                    ctx.now_secs()
                ),
            );
            delay = 0.0;
        }
        ctx.trace(
            msg.id(),
            &format!(
                "Data ID |{}| arrived at |{}|. Delay set to |{}| simtime units",
                msg.id(),
                ctx.now_secs(),
                delay
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Collector, PulseSource};
    use astrons_core::{keys, Config, SimTime};
    use astrons_engine::Simulation;

    fn sized_msg(id: &str, size: f64) -> Message {
        let mut m = Message::with_id(id);
        m.set(keys::DEFAULT_SIZE, size);
        m
    }

    #[test]
    fn test_delay_size_timing() {
        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(vec![(0.0, sized_msg("m1", 100.0))])),
            None,
        );
        let mut config = Config::new();
        config.insert("rate_per_mbit", 10.0);
        let spec = BuildSpec {
            label: "Downlink",
            type_tag: "delaysize",
            config: &config,
        };
        let delay = b.add_node(
            "Downlink",
            "DelaySize",
            config.clone(),
            delay_size(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, delay, None);
        b.connect(delay, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 10.0); // 100 mbits at 10 mbit-units/s
        assert_eq!(seen[0].1.id(), "m1");

        // history carries R = delay = 10 for the DelaySize hop
        let hops = sim.history().get("m1").unwrap();
        let hop = hops.iter().find(|h| h.to == "Downlink").unwrap();
        assert_eq!(hop.reserve, 10.0);
        assert_eq!(hop.total_delay, 10.0);
    }

    #[test]
    fn test_delay_size_reserves_the_node() {
        // two messages at t=0; the second waits out the first's reserve
        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(vec![
                (0.0, sized_msg("m1", 100.0)),
                (0.0, sized_msg("m2", 100.0)),
            ])),
            None,
        );
        let mut config = Config::new();
        config.insert("rate_per_mbit", 10.0);
        let spec = BuildSpec {
            label: "Downlink",
            type_tag: "delaysize",
            config: &config,
        };
        let delay = b.add_node(
            "Downlink",
            "DelaySize",
            config.clone(),
            delay_size(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, delay, None);
        b.connect(delay, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();

        let seen = seen.lock().unwrap();
        let times: Vec<f64> = seen.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, [10.0, 20.0]);
    }

    #[test]
    fn test_delay_time_fixed() {
        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(vec![(5.0, sized_msg("m1", 1.0))])),
            None,
        );
        let mut config = Config::new();
        config.insert("time_delay", 2.5);
        let spec = BuildSpec {
            label: "Hold",
            type_tag: "delaytime",
            config: &config,
        };
        let hold = b.add_node(
            "Hold",
            "DelayTime",
            config.clone(),
            delay_time(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, hold, None);
        b.connect(hold, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();
        assert_eq!(seen.lock().unwrap()[0].0, 7.5);
    }

    #[test]
    fn test_key_delay_holds_until_absolute_time() {
        let mut msg = sized_msg("m1", 1.0);
        msg.set("release_at", 42.0);

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(vec![(0.0, msg)])),
            None,
        );
        let mut config = Config::new();
        config.insert("delay_key", "release_at");
        let spec = BuildSpec {
            label: "Hold",
            type_tag: "keydelaytime",
            config: &config,
        };
        let hold = b.add_node(
            "Hold",
            "KeyDelayTime",
            config.clone(),
            key_delay_time(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, hold, None);
        b.connect(hold, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();
        assert_eq!(seen.lock().unwrap()[0].0, 42.0);
    }

    #[test]
    fn test_key_delay_past_time_clamps_to_now() {
        let mut msg = sized_msg("m1", 1.0);
        msg.set("release_at", 1.0);

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(vec![(5.0, msg)])),
            None,
        );
        let mut config = Config::new();
        config.insert("delay_key", "release_at");
        let spec = BuildSpec {
            label: "Hold",
            type_tag: "keydelaytime",
            config: &config,
        };
        let hold = b.add_node(
            "Hold",
            "KeyDelayTime",
            config.clone(),
            key_delay_time(&spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, hold, None);
        b.connect(hold, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();
        // release time already passed: forwarded immediately
        assert_eq!(seen.lock().unwrap()[0].0, 5.0);
    }
}
