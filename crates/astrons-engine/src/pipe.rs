//! Inter-node plumbing: input pipes and fan-out routers.
//!
//! A [`Pipe`] is the single-consumer FIFO feeding one node's input. A
//! [`NodePipe`] is a node's outgoing fan-out: a set of unconditional
//! broadcast targets plus predicate-gated selective targets. Routing itself
//! (predicate evaluation, the random draw, depositing clones) runs in the
//! simulation so it can reach the RNG and wake consumers; these types are
//! plain storage.

use crate::sim::{NodeId, PipeId};
use astrons_core::{Message, Predicate, SimTime};
use std::collections::VecDeque;

/// Unbounded single-consumer FIFO holding `(enqueue_time, message)` pairs.
#[derive(Debug)]
pub struct Pipe {
    consumer: NodeId,
    queue: VecDeque<(SimTime, Message)>,
}

impl Pipe {
    pub fn new(consumer: NodeId) -> Self {
        Pipe {
            consumer,
            queue: VecDeque::new(),
        }
    }

    pub fn consumer(&self) -> NodeId {
        self.consumer
    }

    pub fn push(&mut self, enqueued: SimTime, message: Message) {
        self.queue.push_back((enqueued, message));
    }

    pub fn pop(&mut self) -> Option<(SimTime, Message)> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A predicate-gated output edge.
#[derive(Debug)]
pub struct SelectiveEdge {
    pub predicate: Predicate,
    pub pipe: PipeId,
    /// The predicate's source text, kept for artifacts and diagnostics.
    pub source: String,
}

/// A node's outgoing fan-out router.
#[derive(Debug, Default)]
pub struct NodePipe {
    /// Unconditional targets; every routed message is deposited into each.
    pub broadcast: Vec<PipeId>,
    /// Predicate-gated targets, evaluated per message.
    pub selective: Vec<SelectiveEdge>,
}

impl NodePipe {
    pub fn new() -> Self {
        NodePipe::default()
    }

    /// Attach an output edge; `condition` gates the edge when present.
    pub fn add_output(&mut self, pipe: PipeId, condition: Option<(Predicate, String)>) {
        match condition {
            Some((predicate, source)) => self.selective.push(SelectiveEdge {
                predicate,
                pipe,
                source,
            }),
            None => self.broadcast.push(pipe),
        }
    }

    pub fn edge_count(&self) -> usize {
        self.broadcast.len() + self.selective.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_is_fifo() {
        let mut pipe = Pipe::new(NodeId(0));
        pipe.push(SimTime::ZERO, Message::with_id("a"));
        pipe.push(SimTime::from_secs(1.0), Message::with_id("b"));

        assert_eq!(pipe.pop().unwrap().1.id(), "a");
        assert_eq!(pipe.pop().unwrap().1.id(), "b");
        assert!(pipe.pop().is_none());
    }

    #[test]
    fn test_node_pipe_edge_bookkeeping() {
        let mut np = NodePipe::new();
        np.add_output(PipeId(0), None);
        np.add_output(
            PipeId(1),
            Some((Predicate::parse("SimTime > 5").unwrap(), "SimTime > 5".into())),
        );
        assert_eq!(np.broadcast.len(), 1);
        assert_eq!(np.selective.len(), 1);
        assert_eq!(np.edge_count(), 2);
        assert_eq!(np.selective[0].source, "SimTime > 5");
    }
}
