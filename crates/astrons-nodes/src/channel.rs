//! Worker-thread adapters.
//!
//! External I/O (brokers, HTTP, hardware) blocks, and the engine never
//! blocks. These adapters are the boundary pattern: the blocking side lives
//! on its own thread and exchanges [`Message`]s with the event loop over
//! `crossbeam_channel`. They are built programmatically, not from network
//! descriptions, and broker-specific node kinds are authored on top of them.

use astrons_core::Message;
use astrons_engine::{NodeBehavior, NodeCtx, NodeError, StepOutput, StepResult};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// A pure source that polls a channel fed by a worker thread.
///
/// Each poll drains everything currently queued and emits it at the current
/// virtual time, then reserves itself for `poll_interval` sim seconds. The
/// node terminates when the channel disconnects and is empty.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Receiver<Message>,
    poll_interval: f64,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<Message>, poll_interval: f64) -> Self {
        assert!(poll_interval > 0.0, "poll interval must be positive");
        ChannelSource {
            receiver,
            poll_interval,
        }
    }
}

impl NodeBehavior for ChannelSource {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        _input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let mut outputs = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => outputs.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if outputs.is_empty() {
                        ctx.trace_node("channel disconnected, source finished");
                        return Ok(StepResult::Stop);
                    }
                    break;
                }
            }
        }
        Ok(StepResult::Continue(StepOutput::send_all(
            self.poll_interval,
            0.0,
            outputs,
        )))
    }
}

/// A leaf node handing each message to a worker thread for external delivery.
///
/// On a disconnected channel the message is re-emitted tagged with an
/// `error` attribute, so descriptions can wire an `error EXISTS` edge to a
/// fallback path; with no such edge the copy terminates normally.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Sender<Message>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Message>) -> Self {
        ChannelSink { sender }
    }
}

impl NodeBehavior for ChannelSink {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<Message>,
    ) -> Result<StepResult, NodeError> {
        let Some(msg) = input else {
            return Ok(StepResult::Continue(StepOutput::idle(0.0)));
        };
        match self.sender.send(msg.clone()) {
            Ok(()) => Ok(StepResult::Continue(StepOutput::idle(0.0))),
            Err(_) => {
                ctx.trace(msg.id(), "channel disconnected, tagging message with error");
                let mut failed = msg;
                failed.set("error", "channel disconnected");
                Ok(StepResult::Continue(StepOutput::send(0.0, 0.0, failed)))
            }
        }
    }

    fn end_of_run(&mut self, ctx: &mut NodeCtx<'_>) {
        ctx.trace_node("closing external channel");
    }
}
