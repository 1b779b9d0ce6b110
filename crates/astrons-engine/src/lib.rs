//! The astroNS simulation engine.
//!
//! A single-threaded cooperative discrete-event simulator. Nodes are state
//! machines behind the [`NodeBehavior`] trait; the engine owns the virtual
//! clock, the inter-node pipes, the fan-out routers, and all bookkeeping
//! (message history, per-node tallies, trace and node logs).
//!
//! ## Execution model
//!
//! Each node step consumes at most one input and yields
//! `(reserve, emit_delay, outputs)`:
//!
//! - the node is busy for `reserve` virtual seconds and takes no new input,
//! - every output becomes visible to downstream pipes `emit_delay` virtual
//!   seconds from now, routed through the node's [`NodePipe`],
//! - ties in virtual time resolve in scheduling order (FIFO).
//!
//! All state mutation happens on the event-loop thread; worker threads hand
//! results back through channels and never touch engine state.

pub mod history;
pub mod logs;
pub mod node;
pub mod pipe;
pub mod queue;
pub mod realtime;
pub mod sim;

pub use history::{HopRecord, MessageHistory, NodeTally};
pub use logs::{NodeLog, TraceLog};
pub use node::{
    BuildError, BuildSpec, BuiltNode, NodeBehavior, NodeConstructor, NodeCtx, NodeError, Param,
    StepOutput, StepResult,
};
pub use pipe::{NodePipe, Pipe, SelectiveEdge};
pub use queue::{ClockError, EventPayload, EventQueue};
pub use realtime::{RealTimeConfig, RealTimePacer};
pub use sim::{
    MetaEntry, MetaId, NodeEntry, NodeId, PipeId, RouterId, RunStats, SimError, Simulation,
    SimulationBuilder, WeightedChoice,
};
