//! The node registry: textual type tags to constructors.

use crate::ModelError;
use astrons_core::{Config, Propagator};
use astrons_engine::NodeConstructor;
use astrons_nodes::GeoPoint;
use std::collections::HashMap;

/// A registered node kind.
pub struct RegisteredKind {
    /// Display name used in trace lines.
    pub kind: &'static str,
    pub construct: NodeConstructor,
}

/// Maps lowercased type tags to node constructors.
///
/// Assembled at startup from the built-in kinds; embedders may register
/// additional kinds before loading a network. `metanode` is not in the
/// registry: the factory expands meta-nodes itself.
pub struct NodeRegistry {
    map: HashMap<String, RegisteredKind>,
}

impl NodeRegistry {
    pub fn empty() -> Self {
        NodeRegistry {
            map: HashMap::new(),
        }
    }

    /// Registry holding every built-in node kind.
    pub fn builtin() -> Self {
        let mut registry = NodeRegistry::empty();
        for kind in astrons_nodes::builtin() {
            registry.register(kind.tag, kind.kind, kind.construct);
        }
        registry
    }

    pub fn register(&mut self, tag: &str, kind: &'static str, construct: NodeConstructor) {
        self.map
            .insert(tag.to_ascii_lowercase(), RegisteredKind { kind, construct });
    }

    pub fn get(&self, tag: &str) -> Option<&RegisteredKind> {
        self.map.get(&tag.to_ascii_lowercase())
    }

    /// All known tags, sorted; used in the unknown-type error.
    pub fn known_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.map.keys().cloned().collect();
        tags.sort();
        tags
    }
}

const KNOWN_PROPAGATORS: [&str; 1] = ["geopoint"];

/// Build a positional model from a meta-node's `propagator` descriptor.
pub fn build_propagator(descriptor: &Config) -> Result<Box<dyn Propagator>, ModelError> {
    let tag = descriptor
        .type_tag()
        .ok_or_else(|| ModelError::UnknownPropagator {
            tag: "<missing>".to_string(),
            known: KNOWN_PROPAGATORS.iter().map(|s| s.to_string()).collect(),
        })?;
    match tag.as_str() {
        "geopoint" => Ok(Box::new(GeoPoint::from_config(descriptor))),
        _ => Err(ModelError::UnknownPropagator {
            tag,
            known: KNOWN_PROPAGATORS.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_core_kinds() {
        let registry = NodeRegistry::builtin();
        for tag in ["delaysize", "randomdatasource", "andgate", "combiner", "sink"] {
            assert!(registry.get(tag).is_some(), "missing {}", tag);
        }
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_tags_are_case_insensitive() {
        let registry = NodeRegistry::builtin();
        assert!(registry.get("DelaySize").is_some());
        assert!(registry.get("DELAYSIZE").is_some());
    }

    #[test]
    fn test_propagator_lookup() {
        let mut descriptor = Config::new();
        descriptor.insert("type", "GeoPoint");
        descriptor.insert("Lat_deg", 10.0);
        assert!(build_propagator(&descriptor).is_ok());

        let mut bad = Config::new();
        bad.insert("type", "tle");
        assert!(matches!(
            build_propagator(&bad),
            Err(ModelError::UnknownPropagator { .. })
        ));
    }
}
