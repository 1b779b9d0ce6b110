//! The AndGate: blocks messages until every configured condition has held.

use astrons_core::{Field, Message, Predicate};
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};

/// Gates messages behind a conjunction of predicate conditions.
///
/// Each arriving message re-evaluates the conditions whose field it carries
/// (`SimTime` counts as always carried); a condition once satisfied stays
/// satisfied until a later message flips it. While any condition is unmet,
/// messages are dropped, or stored when `drop_blocked_messages` is false.
/// The moment all conditions hold, the arriving message and any stored ones
/// flow out together, ordered by `time_sent` (oldest first unless
/// `blocked_messages_FIFO` is false).
#[derive(Debug)]
pub struct AndGate {
    conditions: Vec<Predicate>,
    gate_values: Vec<Option<bool>>,
    time_delay: Param,
    processing_delay: Param,
    drop_blocked_messages: bool,
    blocked_messages_fifo: bool,
    stored: Vec<Message>,
}

pub fn and_gate(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    let mut conditions = Vec::new();
    if let Some(list) = spec.config.list("conditions") {
        for value in list {
            let text = value.to_string();
            let predicate = Predicate::parse(&text).map_err(|source| BuildError::Condition {
                node: spec.label.to_string(),
                source,
            })?;
            conditions.push(predicate);
        }
    }
    let gate_values = vec![None; conditions.len()];
    Ok(BuiltNode::new(Box::new(AndGate {
        conditions,
        gate_values,
        time_delay: spec.param_f64("time_delay", 0.0),
        processing_delay: spec.param_f64("processing_delay", 0.0),
        drop_blocked_messages: spec.config.flag("drop_blocked_messages").unwrap_or(true),
        blocked_messages_fifo: spec.config.flag("blocked_messages_FIFO").unwrap_or(true),
        stored: Vec::new(),
    })))
}

impl AndGate {
    fn update_conditions(&mut self, now: f64, msg: &Message) {
        for (slot, condition) in self.gate_values.iter_mut().zip(&self.conditions) {
            let applies = match condition.field() {
                Some(Field::SimTime) => true,
                Some(Field::Attr(name)) => msg.contains(name),
                None => false,
            };
            if applies {
                *slot = Some(condition.eval(now, msg));
            }
        }
    }

    fn open(&self) -> bool {
        self.gate_values.iter().all(|v| *v == Some(true))
    }
}

impl NodeBehavior for AndGate {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };

        let processing_delay = self.processing_delay.get(ctx);
        let emit_delay = processing_delay + self.time_delay.get(ctx);
        self.update_conditions(ctx.now_secs(), &msg);

        if self.open() {
            if self.stored.is_empty() {
                ctx.trace(msg.id(), "Gates are open, message flows through node.");
                return Ok(StepResult::Continue(StepOutput::send(
                    processing_delay,
                    emit_delay,
                    msg,
                )));
            }
            ctx.trace(
                msg.id(),
                "Gates are open, all stored messages will flow through node.",
            );
            let mut outputs = vec![msg];
            outputs.append(&mut self.stored);
            outputs.sort_by(|a, b| {
                let ta = a.time_sent().unwrap_or(0.0);
                let tb = b.time_sent().unwrap_or(0.0);
                ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
            });
            if !self.blocked_messages_fifo {
                outputs.reverse();
            }
            return Ok(StepResult::Continue(StepOutput::send_all(
                processing_delay,
                emit_delay,
                outputs,
            )));
        }

        if self.drop_blocked_messages {
            ctx.trace(msg.id(), "Gates are closed, message dropped.");
            Ok(StepResult::Continue(StepOutput::idle(processing_delay)))
        } else {
            ctx.trace(msg.id(), "Gates are closed, message stored.");
            self.stored.push(msg);
            Ok(StepResult::Continue(StepOutput::idle(processing_delay)))
        }
    }

    fn state_dump(&self) -> String {
        format!(
            "AndGate {{ open: {}, conditions: {}, stored: {} }}",
            self.open(),
            self.conditions.len(),
            self.stored.len()
        )
    }
}
