//! Network description loading and graph construction.
//!
//! A network description is a mapping `label -> config` in YAML, JSON or
//! INI. The reserved `DEFAULT` section seeds every node's configuration;
//! node kinds resolve through the [`NodeRegistry`]; meta-nodes pull in
//! nested descriptions recursively; and a second pass wires edges by the
//! key-names-a-node convention.

pub mod description;
pub mod factory;
pub mod meta;
pub mod registry;

pub use description::{load_description_file, parse_description, Description, Format};
pub use factory::{load_network_file, load_network_str, LoadedNetwork, NetworkFactory};
pub use registry::{build_propagator, NodeRegistry};

use thiserror::Error;

/// Errors raised while loading a network. All are fatal at load time.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("could not read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse '{what}' as {format:?}: {reason}")]
    Parse {
        what: String,
        format: Format,
        reason: String,
    },

    #[error("unknown network file type '{0}'; accepted types are [ini, json, yml]")]
    UnknownFormat(String),

    #[error("node '{label}' has no 'type' key")]
    MissingType { label: String },

    #[error("node '{label}': type '{tag}' not loaded in factory; known types: {}", known.join(", "))]
    UnknownNodeType {
        label: String,
        tag: String,
        known: Vec<String>,
    },

    #[error("unknown propagator type '{tag}'; known types: {}", known.join(", "))]
    UnknownPropagator { tag: String, known: Vec<String> },

    #[error(transparent)]
    Build(#[from] astrons_engine::BuildError),

    #[error("edge {from} -> {to}: condition did not compile: {source}")]
    Condition {
        from: String,
        to: String,
        #[source]
        source: astrons_core::PredicateError,
    },

    #[error("edge {from} -> {to}: value must be a predicate string or empty")]
    BadEdgeValue { from: String, to: String },

    #[error("meta-node '{label}': {reason}")]
    Meta { label: String, reason: String },

    #[error("meta-node '{label}': override targets unknown sub-node '{target}'")]
    UnknownOverrideTarget { label: String, target: String },
}
