//! TCP throughput delay via the Mathis equation.

use astrons_core::Message;
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};

/// Delays messages by the transfer time the Mathis model predicts:
/// `throughput = mss * C / (rtt * sqrt(loss))`.
///
/// Each parameter may be overridden per message by an attribute of the same
/// name, so upstream nodes can model changing link conditions. The computed
/// throughput and transfer time are annotated onto the message.
#[derive(Debug)]
pub struct MathisDelay {
    mss: Param,
    rtt: Param,
    packet_loss: Param,
    c_constant: Param,
    time_delay: Param,
}

pub fn mathis_delay(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    Ok(BuiltNode::new(Box::new(MathisDelay {
        mss: spec.param_f64("mss", 1460.0),
        rtt: spec.param_f64("rtt", 0.1),
        packet_loss: spec.param_f64("packet_loss", 0.001),
        c_constant: spec.param_f64("c_constant", 0.93),
        time_delay: spec.param_f64("time_delay", 0.0),
    })))
}

/// Maximum TCP throughput per the Mathis equation; infinite on a lossless
/// link.
pub fn throughput_mathis(mss: f64, rtt: f64, packet_loss: f64, c: f64) -> f64 {
    if packet_loss < 1e-10 {
        f64::INFINITY
    } else {
        (mss * c) / (rtt * packet_loss.sqrt())
    }
}

impl MathisDelay {
    /// Message attributes win over configured values.
    fn param(&self, ctx: &mut NodeCtx<'_>, msg: &Message, name: &str, param: &Param) -> f64 {
        msg.get(name)
            .and_then(|v| v.to_number())
            .unwrap_or_else(|| param.get(ctx))
    }
}

impl NodeBehavior for MathisDelay {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(mut msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };

        let mss = self.param(ctx, &msg, "mss", &self.mss);
        let rtt = self.param(ctx, &msg, "rtt", &self.rtt);
        let packet_loss = self.param(ctx, &msg, "packet_loss", &self.packet_loss);
        let c_constant = self.param(ctx, &msg, "c_constant", &self.c_constant);
        if rtt <= 0.0 {
            return Err(NodeError::new(ctx.label(), "rtt must be positive"));
        }

        let throughput = throughput_mathis(mss, rtt, packet_loss, c_constant);
        let size = msg.size(ctx.size_key());
        let transfer_time = if throughput.is_infinite() {
            0.0
        } else if throughput > 0.0 {
            size / throughput
        } else {
            return Err(NodeError::new(ctx.label(), "computed throughput is zero"));
        };
        let delay = transfer_time + self.time_delay.get(ctx);

        msg.set("throughput", throughput);
        msg.set("processing_time", transfer_time);
        ctx.trace(
            msg.id(),
            &format!(
                "Mathis throughput |{:.3}| for size |{}|, transfer took |{:.6}|",
                throughput, size, transfer_time
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(delay, delay, msg)))
    }
}
