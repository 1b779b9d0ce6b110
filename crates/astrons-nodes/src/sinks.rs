//! Terminal consumers.

use astrons_core::Message;
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};

/// Consumes messages and emits nothing; the end of a path.
///
/// `log_keys` names attributes worth echoing into the trace per message.
#[derive(Debug)]
pub struct Sink {
    time_delay: Param,
    log_keys: Vec<String>,
    received: u64,
}

pub fn sink(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    let log_keys = spec
        .config
        .list("log_keys")
        .map(|list| list.iter().map(|v| v.to_string()).collect())
        .unwrap_or_default();
    Ok(BuiltNode::new(Box::new(Sink {
        time_delay: spec.param_f64("time_delay", 0.0),
        log_keys,
        received: 0,
    })))
}

impl NodeBehavior for Sink {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        self.received += 1;

        let mut text = format!("Message #{} received", self.received);
        for key in &self.log_keys {
            match msg.get(key) {
                Some(value) => text.push_str(&format!(", {}=|{}|", key, value)),
                None => text.push_str(&format!(", {}=<missing>", key)),
            }
        }
        ctx.trace(msg.id(), &text);

        Ok(StepResult::Continue(StepOutput::idle(
            self.time_delay.get(ctx),
        )))
    }

    fn state_dump(&self) -> String {
        format!("Sink {{ received: {} }}", self.received)
    }
}
