//! Multi-CPU processing node.

use astrons_core::Message;
use astrons_engine::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeCtx, NodeError, Param, StepOutput,
    StepResult,
};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Models a bank of CPUs processing messages at `rate_per_mbit`.
///
/// Each message grabs a CPU (earliest-free by default, or the first idle one
/// in stack mode), is processed for `size / rate` seconds, and the node's
/// reserve is the time until another CPU frees up. `returnToSender` swaps
/// the message's `to`/`from` attributes, for request/reply topologies.
#[derive(Debug)]
pub struct Processor {
    rate_per_mbit: Param,
    return_to_sender: bool,
    cpus: CpuBank,
    cpu_time_idle: Vec<f64>,
    cpu_processing_time: Vec<f64>,
}

/// CPU availability tracking, in whole microseconds for exact heap ordering.
#[derive(Debug)]
enum CpuBank {
    /// Earliest-free CPU wins.
    EarliestFree(BinaryHeap<Reverse<(u64, usize)>>),
    /// First idle CPU wins; falls back to the earliest-free one.
    Stack(Vec<(usize, u64)>),
}

impl CpuBank {
    fn new(num_cpus: usize, stack_mode: bool) -> Self {
        if stack_mode {
            CpuBank::Stack((0..num_cpus).map(|cpu| (cpu, 0)).collect())
        } else {
            CpuBank::EarliestFree((0..num_cpus).map(|cpu| Reverse((0, cpu))).collect())
        }
    }

    /// Claim a CPU at `now_us` for `busy_us`; returns the claimed CPU, when
    /// it was available, and when the next CPU frees up after the claim.
    fn claim(&mut self, now_us: u64, busy_us: u64) -> (usize, u64, u64) {
        match self {
            CpuBank::EarliestFree(heap) => {
                let Reverse((available, cpu)) = heap.pop().expect("cpu bank is never empty");
                heap.push(Reverse((now_us + busy_us, cpu)));
                let Reverse((next_free, _)) = *heap.peek().expect("cpu bank is never empty");
                (cpu, available, next_free)
            }
            CpuBank::Stack(cpus) => {
                let idx = cpus
                    .iter()
                    .position(|(_, available)| *available < now_us)
                    .unwrap_or_else(|| {
                        cpus.iter()
                            .enumerate()
                            .min_by_key(|(_, (_, available))| *available)
                            .map(|(idx, _)| idx)
                            .expect("cpu bank is never empty")
                    });
                let (cpu, available) = cpus[idx];
                cpus[idx] = (cpu, now_us + busy_us);
                let next_free = cpus
                    .iter()
                    .map(|(_, available)| *available)
                    .min()
                    .expect("cpu bank is never empty");
                (cpu, available, next_free)
            }
        }
    }
}

pub fn processor(spec: &BuildSpec<'_>) -> Result<BuiltNode, BuildError> {
    let num_cpus = spec.config.i64("num_of_cpus").unwrap_or(1);
    if num_cpus < 1 {
        return Err(spec.bad_value("num_of_cpus", "must be at least 1"));
    }
    let stack_mode = spec.config.flag("cpuStackMode").unwrap_or(false);
    Ok(BuiltNode::new(Box::new(Processor {
        rate_per_mbit: spec.param_f64("rate_per_mbit", 100.0),
        return_to_sender: spec.config.flag("returnToSender").unwrap_or(false),
        cpus: CpuBank::new(num_cpus as usize, stack_mode),
        cpu_time_idle: Vec::new(),
        cpu_processing_time: Vec::new(),
    })))
}

impl NodeBehavior for Processor {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(mut msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        let rate = self.rate_per_mbit.get(ctx);
        if rate <= 0.0 {
            return Err(NodeError::new(ctx.label(), "rate_per_mbit must be positive"));
        }

        let now_us = ctx.now().as_micros();
        let size = msg.size(ctx.size_key());
        let processing_time = size / rate;
        let busy_us = (processing_time * 1e6).round() as u64;

        let (cpu, available_us, next_free_us) = self.cpus.claim(now_us, busy_us);
        let time_idle = now_us.saturating_sub(available_us) as f64 / 1e6;
        let reserve = next_free_us.saturating_sub(now_us) as f64 / 1e6;
        self.cpu_time_idle.push(time_idle);
        self.cpu_processing_time.push(processing_time);

        if self.return_to_sender {
            let to = msg.remove("to");
            let from = msg.remove("from");
            if let Some(from) = from {
                msg.set("to", from);
            }
            if let Some(to) = to {
                msg.set("from", to);
            }
        }

        ctx.trace(
            msg.id(),
            &format!(
                "Data size of |{}| arrived at |{}|. CPU used: |{}| Processing Time: |{}| CPU idle: |{}|",
                size,
                ctx.now_secs(),
                cpu,
                processing_time,
                time_idle
            ),
        );
        Ok(StepResult::Continue(StepOutput::send(
            reserve,
            processing_time,
            msg,
        )))
    }

    fn state_dump(&self) -> String {
        let total_idle: f64 = self.cpu_time_idle.iter().sum();
        let total_processing: f64 = self.cpu_processing_time.iter().sum();
        format!(
            "Processor {{ jobs: {}, cpu_idle_total: {:.3}, cpu_processing_total: {:.3} }}",
            self.cpu_processing_time.len(),
            total_idle,
            total_processing
        )
    }
}
