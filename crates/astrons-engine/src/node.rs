//! The node-author interface.
//!
//! A node kind is a state machine implementing [`NodeBehavior`]. The engine
//! drives it with at most one input per step; the behavior answers with a
//! [`StepResult`]: how long the node is busy (`reserve`), how long until its
//! outputs become visible downstream (`emit_delay`), and the outputs
//! themselves.

use astrons_core::{Config, PredicateError};
use thiserror::Error;

// NodeCtx lives with the simulation world it borrows.
pub use crate::sim::NodeCtx;

/// A single step's yield.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Virtual seconds the node stays busy and takes no new input. `>= 0`.
    pub reserve: f64,
    /// Virtual seconds until each output is visible downstream. `>= 0`.
    pub emit_delay: f64,
    /// Messages to emit; routed through the node's outgoing fan-out.
    pub outputs: Vec<astrons_core::Message>,
}

impl StepOutput {
    /// No outputs; busy for `reserve` seconds.
    pub fn idle(reserve: f64) -> Self {
        StepOutput {
            reserve,
            ..Default::default()
        }
    }

    /// Emit one message.
    pub fn send(reserve: f64, emit_delay: f64, message: astrons_core::Message) -> Self {
        StepOutput {
            reserve,
            emit_delay,
            outputs: vec![message],
        }
    }

    /// Emit several messages sharing one delay.
    pub fn send_all(
        reserve: f64,
        emit_delay: f64,
        outputs: Vec<astrons_core::Message>,
    ) -> Self {
        StepOutput {
            reserve,
            emit_delay,
            outputs,
        }
    }
}

/// Outcome of one step.
#[derive(Debug)]
pub enum StepResult {
    /// Keep running; schedule per [`StepOutput`].
    Continue(StepOutput),
    /// Terminate the node cooperatively.
    Stop,
}

/// A fatal failure inside a node behavior. Aborts the run; recoverable
/// conditions should instead emit an error-tagged message on an error edge.
#[derive(Debug, Error)]
#[error("node '{node}' failed: {reason}")]
pub struct NodeError {
    pub node: String,
    pub reason: String,
}

impl NodeError {
    pub fn new(node: impl Into<String>, reason: impl Into<String>) -> Self {
        NodeError {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while constructing a node from its configuration.
/// All are fatal at load time.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("node '{node}': missing required key '{key}'")]
    MissingKey { node: String, key: String },

    #[error("node '{node}': key '{key}' {expected}")]
    BadValue {
        node: String,
        key: String,
        expected: String,
    },

    #[error("node '{node}': {source}")]
    Condition {
        node: String,
        #[source]
        source: PredicateError,
    },
}

/// What a node constructor gets to work with.
pub struct BuildSpec<'a> {
    /// Scope-local label (namespaced later for meta sub-graphs).
    pub label: &'a str,
    /// Lowercased node-kind tag.
    pub type_tag: &'a str,
    /// Effective configuration after DEFAULT and override composition.
    pub config: &'a Config,
}

impl<'a> BuildSpec<'a> {
    pub fn missing(&self, key: &str) -> BuildError {
        BuildError::MissingKey {
            node: self.label.to_string(),
            key: key.to_string(),
        }
    }

    pub fn bad_value(&self, key: &str, expected: &str) -> BuildError {
        BuildError::BadValue {
            node: self.label.to_string(),
            key: key.to_string(),
            expected: expected.to_string(),
        }
    }

    /// A required string key.
    pub fn require_str(&self, key: &str) -> Result<String, BuildError> {
        self.config
            .str(key)
            .map(str::to_string)
            .ok_or_else(|| self.missing(key))
    }

    /// A numeric parameter that may instead name a value-provider node
    /// (e.g. a RandomDistrib) to draw from per access.
    pub fn param_f64(&self, key: &str, default: f64) -> Param {
        match self.config.get(key) {
            None => Param::Value(default),
            Some(v) => match v.to_number() {
                Some(n) => Param::Value(n),
                None => match v.as_str() {
                    Some(name) => Param::Provider {
                        name: name.to_string(),
                        default,
                    },
                    None => Param::Value(default),
                },
            },
        }
    }
}

/// A numeric configuration parameter: a literal, or a reference to a named
/// value provider resolved per access against the simulation RNG.
#[derive(Debug, Clone)]
pub enum Param {
    Value(f64),
    Provider { name: String, default: f64 },
}

impl Param {
    pub fn get(&self, ctx: &mut NodeCtx<'_>) -> f64 {
        match self {
            Param::Value(v) => *v,
            Param::Provider { name, default } => ctx
                .draw_provider(name)
                .and_then(|v| v.to_number())
                .unwrap_or(*default),
        }
    }

    /// The literal value, if this parameter is not provider-backed.
    pub fn literal(&self) -> Option<f64> {
        match self {
            Param::Value(v) => Some(*v),
            Param::Provider { .. } => None,
        }
    }
}

/// Result of constructing a node from its configuration: the behavior, plus
/// an optional value provider registered under the node's label (the
/// RandomDistrib pattern).
#[derive(Debug)]
pub struct BuiltNode {
    pub behavior: Box<dyn NodeBehavior>,
    pub provider: Option<crate::sim::WeightedChoice>,
}

impl BuiltNode {
    pub fn new(behavior: Box<dyn NodeBehavior>) -> Self {
        BuiltNode {
            behavior,
            provider: None,
        }
    }

    pub fn with_provider(
        behavior: Box<dyn NodeBehavior>,
        provider: crate::sim::WeightedChoice,
    ) -> Self {
        BuiltNode {
            behavior,
            provider: Some(provider),
        }
    }
}

/// A node kind's constructor, as registered with the node registry.
pub type NodeConstructor = fn(&BuildSpec<'_>) -> Result<BuiltNode, BuildError>;

/// A node kind: construction plus the step protocol.
///
/// `handle_timer` receives timers requested through
/// [`NodeCtx::schedule_timer`]; timer yields may emit messages but never
/// reserve the node. `end_of_run` is the teardown hook, called by the
/// orchestrator at the end of every run regardless of outcome.
pub trait NodeBehavior: std::fmt::Debug + Send {
    fn step(
        &mut self,
        ctx: &mut NodeCtx<'_>,
        input: Option<astrons_core::Message>,
    ) -> Result<StepResult, NodeError>;

    fn handle_timer(
        &mut self,
        _ctx: &mut NodeCtx<'_>,
        _token: u64,
    ) -> Result<StepResult, NodeError> {
        Ok(StepResult::Continue(StepOutput::idle(0.0)))
    }

    fn end_of_run(&mut self, _ctx: &mut NodeCtx<'_>) {}

    /// One-line state description for the end-of-run dump.
    fn state_dump(&self) -> String {
        format!("{:?}", self)
    }
}
