//! Message-shaping operators: combine, split, reduce, annotate.

use astrons_core::{AttrValue, Message};
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};

/// Accumulates a key's values across messages; once `num_messages` have
/// arrived, the latest message goes out carrying the combined list.
#[derive(Debug)]
pub struct Combiner {
    num_messages: u64,
    key: Option<String>,
    time_delay: Param,
    processing_delay: Param,
    fields: Vec<AttrValue>,
    count: u64,
}

pub fn combiner(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(Combiner {
        num_messages: spec.config.i64("num_messages").unwrap_or(1).max(1) as u64,
        key: spec.config.str("key").map(str::to_string),
        time_delay: spec.param_f64("time_delay", 0.0),
        processing_delay: spec.param_f64("processing_delay", 0.0),
        fields: Vec::new(),
        count: 0,
    })))
}

impl NodeBehavior for Combiner {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let key = self
            .key
            .clone()
            .unwrap_or_else(|| ctx.size_key().to_string());
        let processing_delay = self.processing_delay.get(ctx);
        let emit_delay = processing_delay + self.time_delay.get(ctx);

        self.count += 1;
        match msg.get(&key) {
            Some(AttrValue::List(values)) => {
                self.fields.extend(values.iter().cloned());
                ctx.trace(msg.id(), &format!("Added list to key: {}.", key));
            }
            Some(value) => {
                self.fields.push(value.clone());
                ctx.trace(msg.id(), &format!("Added {} to key: {}.", value, key));
            }
            None => {
                ctx.trace(
                    msg.id(),
                    &format!("Key {} not found in message, not added to list.", key),
                );
            }
        }

        if self.count >= self.num_messages {
            ctx.trace(
                msg.id(),
                "Total threshold messages met, forwarding combined message.",
            );
            let mut out = msg;
            out.set(key, AttrValue::List(std::mem::take(&mut self.fields)));
            self.count = 0;
            Ok(StepResult::Continue(StepOutput::send(
                processing_delay,
                emit_delay,
                out,
            )))
        } else {
            Ok(StepResult::Continue(StepOutput::idle(processing_delay)))
        }
    }

    fn state_dump(&self) -> String {
        format!(
            "Combiner {{ pending: {}/{}, accumulated: {} }}",
            self.count,
            self.num_messages,
            self.fields.len()
        )
    }
}

/// Replaces a list-valued key with its minimum element.
#[derive(Debug)]
pub struct Minimizer {
    key: String,
    time_delay: Param,
}

pub fn minimizer(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(Minimizer {
        key: spec.config.str("key").unwrap_or("KEY").to_string(),
        time_delay: spec.param_f64("time_delay", 0.0),
    })))
}

fn min_of(values: &[AttrValue]) -> Option<AttrValue> {
    if values.is_empty() {
        return None;
    }
    if let Some(numbers) = values
        .iter()
        .map(AttrValue::to_number)
        .collect::<Option<Vec<f64>>>()
    {
        let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
        return Some(AttrValue::Float(min));
    }
    values
        .iter()
        .min_by(|a, b| a.to_string().cmp(&b.to_string()))
        .cloned()
}

impl NodeBehavior for Minimizer {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(mut msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let delay = self.time_delay.get(ctx);

        let minimum = msg.get(&self.key).and_then(|v| match v {
            AttrValue::List(values) => min_of(values),
            other => Some(other.clone()),
        });
        match minimum {
            Some(min) => {
                ctx.trace(
                    msg.id(),
                    &format!(
                        "Message with list of values received, minimum value was {}.",
                        min
                    ),
                );
                msg.set(self.key.clone(), min);
            }
            None => {
                // shape mismatch: pass the message along untouched
                ctx.trace(
                    msg.id(),
                    "This node had an error associated with the message.",
                );
            }
        }
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}

/// Splits a list-valued key into one message per element.
#[derive(Debug)]
pub struct Partitioner {
    key: String,
    time_delay: Param,
}

pub fn partitioner(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(Partitioner {
        key: spec.config.str("key").unwrap_or("KEY").to_string(),
        time_delay: spec.param_f64("time_delay", 0.0),
    })))
}

impl NodeBehavior for Partitioner {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let delay = self.time_delay.get(ctx);

        let outputs = match msg.get(&self.key) {
            Some(AttrValue::List(values)) => values
                .iter()
                .map(|value| {
                    let mut part = msg.clone();
                    part.set(self.key.clone(), value.clone());
                    part
                })
                .collect(),
            Some(_) => vec![msg.clone()],
            None => {
                ctx.trace(
                    msg.id(),
                    &format!("Key {} not found in message, nothing to partition.", self.key),
                );
                Vec::new()
            }
        };
        Ok(StepResult::Continue(StepOutput::send_all(
            delay, delay, outputs,
        )))
    }
}

/// Stamps a fixed key/value pair onto every message.
#[derive(Debug)]
pub struct AddKeyValue {
    key: String,
    value: AttrValue,
    time_delay: Param,
}

pub fn add_key_value(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    let key = spec.require_str("key")?;
    let value = spec
        .config
        .get("value")
        .cloned()
        .ok_or_else(|| spec.missing("value"))?;
    Ok(BuiltNode::new(Box::new(AddKeyValue {
        key,
        value,
        time_delay: spec.param_f64("time_delay", 0.0),
    })))
}

impl NodeBehavior for AddKeyValue {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(mut msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let delay = self.time_delay.get(ctx);
        msg.set(self.key.clone(), self.value.clone());
        ctx.trace(
            msg.id(),
            &format!(
                "Data ID {} arrived at {}. Adding new key-value pair: {}={}",
                msg.id(),
                ctx.now_secs(),
                self.key,
                self.value
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}
