//! Weighted-population value provider.

use astrons_core::Message;
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult, WeightedChoice,
};

/// Draws values from a weighted population.
///
/// Used two ways: inline in the graph (each passing message gets a draw
/// under `result_key`), and as a named provider other nodes' numeric config
/// fields can reference by this node's label, drawing once per access.
#[derive(Debug)]
pub struct RandomDistrib {
    choice: WeightedChoice,
    result_key: String,
    time_delay: Param,
}

pub fn random_distrib(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    let population = spec
        .config
        .list("population")
        .ok_or_else(|| spec.missing("population"))?
        .clone();
    let weights: Vec<f64> = spec
        .config
        .list("weights")
        .ok_or_else(|| spec.missing("weights"))?
        .iter()
        .map(|w| {
            w.to_number()
                .ok_or_else(|| spec.bad_value("weights", "must all be numeric"))
        })
        .collect::<Result<_, _>>()?;

    let choice = WeightedChoice::new(population, weights)
        .map_err(|reason| spec.bad_value("weights", &reason))?;

    Ok(BuiltNode::with_provider(
        Box::new(RandomDistrib {
            choice: choice.clone(),
            result_key: spec
                .config
                .str("result_key")
                .unwrap_or("size_mbits")
                .to_string(),
            time_delay: spec.param_f64("time_delay", 0.01),
        }),
        choice,
    ))
}

impl NodeBehavior for RandomDistrib {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(mut msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let delay = self.time_delay.get(ctx);
        let value = self.choice.draw(ctx.rng());
        ctx.trace(
            msg.id(),
            &format!("random value:|{}| set to key:|{}|", value, self.result_key),
        );
        msg.set(self.result_key.clone(), value);
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Collector, PulseSource};
    use astrons_core::{AttrValue, Config, SimTime};
    use astrons_engine::Simulation;

    fn distrib_config(population: &[f64], weights: &[f64]) -> Config {
        let mut config = Config::new();
        config.insert(
            "population",
            AttrValue::List(population.iter().map(|v| AttrValue::Float(*v)).collect()),
        );
        config.insert(
            "weights",
            AttrValue::List(weights.iter().map(|v| AttrValue::Float(*v)).collect()),
        );
        config
    }

    #[test]
    fn test_inline_draws_respect_weights() {
        let mut config = distrib_config(&[5.0, 9.0], &[1.0, 0.0]);
        config.insert("result_key", "chosen");
        let spec = BuildSpec {
            label: "Jitter",
            type_tag: "randomdistrib",
            config: &config,
        };

        let inputs: Vec<(f64, Message)> = (0..10)
            .map(|i| (i as f64, Message::with_id(format!("m{}", i))))
            .collect();

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(inputs)),
            None,
        );
        let built = random_distrib(&spec).unwrap();
        let distrib = b.add_node("Jitter", "RandomDistrib", config.clone(), built.behavior, None);
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, distrib, None);
        b.connect(distrib, sink, None);

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        for (_, msg) in seen.iter() {
            // weight 0 on 9.0: every draw lands on 5.0
            assert_eq!(msg.get("chosen").unwrap().as_f64(), Some(5.0));
        }
    }

    #[test]
    fn test_provider_feeds_other_nodes_params() {
        // a DelayTime whose time_delay names the distrib node
        let distrib_cfg = distrib_config(&[4.0], &[1.0]);
        let spec = BuildSpec {
            label: "JitterTable",
            type_tag: "randomdistrib",
            config: &distrib_cfg,
        };
        let built = random_distrib(&spec).unwrap();

        let mut delay_cfg = Config::new();
        delay_cfg.insert("time_delay", "JitterTable");
        let delay_spec = BuildSpec {
            label: "Hold",
            type_tag: "delaytime",
            config: &delay_cfg,
        };

        let mut b = Simulation::builder(0);
        let src = b.add_node(
            "Source",
            "PulseSource",
            Config::new(),
            Box::new(PulseSource::new(vec![(0.0, Message::with_id("m"))])),
            None,
        );
        let hold = b.add_node(
            "Hold",
            "DelayTime",
            delay_cfg.clone(),
            crate::delays::delay_time(&delay_spec).unwrap().behavior,
            None,
        );
        let (collector, seen) = Collector::new();
        let sink = b.add_node("Sink", "Collector", Config::new(), Box::new(collector), None);
        b.connect(src, hold, None);
        b.connect(hold, sink, None);
        b.add_provider("JitterTable", built.provider.unwrap());

        let mut sim = b.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();

        // the delay came from the provider's lone population value
        assert_eq!(seen.lock().unwrap()[0].0, 4.0);
    }

    #[test]
    fn test_mismatched_weights_fatal() {
        let config = distrib_config(&[1.0, 2.0], &[1.0]);
        let spec = BuildSpec {
            label: "Jitter",
            type_tag: "randomdistrib",
            config: &config,
        };
        assert!(random_distrib(&spec).is_err());
    }
}
