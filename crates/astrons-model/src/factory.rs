//! The network factory: descriptions in, a wired simulation out.
//!
//! Construction is two passes per scope. The first pass composes each
//! node's effective configuration (`DEFAULT`, then the node's own block,
//! then any meta-node override, later wins), resolves its type through the
//! registry, and instantiates it; meta-nodes recurse into their sub-graph
//! with a namespaced label prefix. The second pass wires edges: any
//! configuration key equal to a node's scope-relative label (case
//! insensitive) is an edge, gated by a predicate when its value is a
//! non-empty string.
//!
//! A scope's wiring map also carries every descendant node under its
//! relative path (`Constellation/Relay`), so outer scopes can address into
//! meta sub-graphs and sub-graph nodes can link out to nodes of enclosing
//! scopes.

use crate::description::{load_description_file, parse_description, Description, Format};
use crate::meta;
use crate::registry::{build_propagator, NodeRegistry};
use crate::ModelError;
use astrons_core::{AttrValue, Config, Predicate};
use astrons_engine::{BuildSpec, MetaId, NodeId, SimulationBuilder};
use std::collections::HashMap;
use std::path::Path;

/// What loading produced besides the populated builder.
#[derive(Debug)]
pub struct LoadedNetwork {
    /// Every parsed scope document, top-level first, meta-node documents
    /// wrapped under their full label. Serialized into
    /// `loaded_network.json` for reproducibility.
    pub documents: Vec<serde_json::Value>,
    /// Total nodes instantiated, sub-graphs included.
    pub node_count: usize,
}

/// One instantiated node, addressed relative to some scope.
struct ScopeNode {
    rel_label: String,
    id: NodeId,
    config: Config,
}

struct MetaContext<'a> {
    meta_id: MetaId,
    /// Absolute label prefix, `"KSAT/Hawaii/"` style.
    prefix: String,
    overrides: &'a [(String, Config)],
}

/// Builds simulations from network descriptions.
pub struct NetworkFactory<'a> {
    registry: &'a NodeRegistry,
    documents: Vec<serde_json::Value>,
}

impl<'a> NetworkFactory<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        NetworkFactory {
            registry,
            documents: Vec::new(),
        }
    }

    /// Instantiate and wire `description` into `builder`.
    pub fn load(
        mut self,
        description: &Description,
        builder: &mut SimulationBuilder,
    ) -> Result<LoadedNetwork, ModelError> {
        self.documents.push(
            serde_json::to_value(description).expect("descriptions serialize to JSON"),
        );
        let nodes = self.create_scope(description, builder, None)?;
        tracing::info!(nodes = nodes.len(), "network loaded");
        Ok(LoadedNetwork {
            documents: self.documents,
            node_count: nodes.len(),
        })
    }

    fn create_scope(
        &mut self,
        description: &Description,
        builder: &mut SimulationBuilder,
        parent: Option<&MetaContext<'_>>,
    ) -> Result<Vec<ScopeNode>, ModelError> {
        let default_config = description.get("DEFAULT").cloned().unwrap_or_default();
        let no_overrides: [(String, Config); 0] = [];
        let overrides: &[(String, Config)] = parent.map(|m| m.overrides).unwrap_or(&no_overrides);
        let prefix = parent.map(|m| m.prefix.as_str()).unwrap_or("");
        let parent_meta = parent.map(|m| m.meta_id);

        let mut scope: Vec<ScopeNode> = Vec::new();

        for (label, raw_config) in description {
            // case-insensitive so the INI parser's key folding cannot hide it
            if label.eq_ignore_ascii_case("DEFAULT") {
                continue;
            }
            let mut effective = default_config.merged_under(raw_config);
            if let Some((_, override_config)) =
                overrides.iter().find(|(target, _)| target == label)
            {
                effective = effective.merged_under(override_config);
            }

            let full_label = format!("{}{}", prefix, label);
            let tag = effective.type_tag().ok_or_else(|| ModelError::MissingType {
                label: full_label.clone(),
            })?;

            if tag == "metanode" {
                let sub_nodes =
                    self.expand_meta(&full_label, &effective, builder, parent_meta)?;
                for node in sub_nodes {
                    scope.push(ScopeNode {
                        rel_label: format!("{}/{}", label, node.rel_label),
                        ..node
                    });
                }
                continue;
            }

            let registered =
                self.registry
                    .get(&tag)
                    .ok_or_else(|| ModelError::UnknownNodeType {
                        label: full_label.clone(),
                        tag: tag.clone(),
                        known: self.registry.known_tags(),
                    })?;
            let spec = BuildSpec {
                label,
                type_tag: &tag,
                config: &effective,
            };
            let built = (registered.construct)(&spec)?;
            let id = builder.add_node(
                full_label,
                registered.kind,
                effective.clone(),
                built.behavior,
                parent_meta,
            );
            if let Some(provider) = built.provider {
                builder.add_provider(label.clone(), provider);
            }
            scope.push(ScopeNode {
                rel_label: label.clone(),
                id,
                config: effective,
            });
        }

        self.wire_scope(&scope, builder)?;
        Ok(scope)
    }

    fn expand_meta(
        &mut self,
        full_label: &str,
        config: &Config,
        builder: &mut SimulationBuilder,
        parent_meta: Option<MetaId>,
    ) -> Result<Vec<ScopeNode>, ModelError> {
        let propagator = match config.get("propagator") {
            None | Some(AttrValue::Null) => None,
            Some(AttrValue::Map(descriptor)) => {
                let descriptor: Config = descriptor
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(build_propagator(&descriptor)?)
            }
            Some(_) => {
                return Err(ModelError::Meta {
                    label: full_label.to_string(),
                    reason: "propagator must be a mapping".to_string(),
                })
            }
        };

        let sub_description = meta::resolve_source(full_label, config)?;
        let sub_overrides = meta::overrides_of(full_label, config)?;
        for (target, _) in &sub_overrides {
            if !sub_description.contains_key(target) {
                return Err(ModelError::UnknownOverrideTarget {
                    label: full_label.to_string(),
                    target: target.clone(),
                });
            }
        }

        let mut wrapped = serde_json::Map::new();
        wrapped.insert(
            full_label.to_string(),
            serde_json::to_value(&sub_description).expect("descriptions serialize to JSON"),
        );
        self.documents.push(serde_json::Value::Object(wrapped));

        let meta_id = builder.add_meta(full_label.to_string(), parent_meta, propagator);
        let context = MetaContext {
            meta_id,
            prefix: format!("{}/", full_label),
            overrides: &sub_overrides,
        };
        tracing::info!(meta = full_label, "expanding meta-node sub-graph");
        self.create_scope(&sub_description, builder, Some(&context))
    }

    fn wire_scope(
        &self,
        scope: &[ScopeNode],
        builder: &mut SimulationBuilder,
    ) -> Result<(), ModelError> {
        let node_map: HashMap<String, NodeId> = scope
            .iter()
            .map(|node| (node.rel_label.to_lowercase(), node.id))
            .collect();

        for from in scope {
            for (key, value) in from.config.iter() {
                let Some(&to_id) = node_map.get(&key.to_lowercase()) else {
                    continue;
                };
                match value {
                    AttrValue::Null => builder.connect(from.id, to_id, None),
                    AttrValue::String(text) if text.trim().is_empty() => {
                        builder.connect(from.id, to_id, None)
                    }
                    AttrValue::String(text) => {
                        let predicate =
                            Predicate::parse(text).map_err(|source| ModelError::Condition {
                                from: from.rel_label.clone(),
                                to: key.clone(),
                                source,
                            })?;
                        builder.connect(from.id, to_id, Some((predicate, text.clone())));
                    }
                    _ => {
                        return Err(ModelError::BadEdgeValue {
                            from: from.rel_label.clone(),
                            to: key.clone(),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

/// Load a network description file into `builder`.
pub fn load_network_file(
    path: &Path,
    registry: &NodeRegistry,
    builder: &mut SimulationBuilder,
) -> Result<LoadedNetwork, ModelError> {
    let description = load_description_file(path)?;
    NetworkFactory::new(registry).load(&description, builder)
}

/// Load a network description from text into `builder`.
pub fn load_network_str(
    text: &str,
    format: Format,
    registry: &NodeRegistry,
    builder: &mut SimulationBuilder,
) -> Result<LoadedNetwork, ModelError> {
    let description = parse_description(text, format, "<inline>")?;
    NetworkFactory::new(registry).load(&description, builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use astrons_core::SimTime;
    use astrons_engine::Simulation;

    fn build(yaml: &str) -> Result<(Simulation, LoadedNetwork), ModelError> {
        let registry = NodeRegistry::builtin();
        let mut builder = Simulation::builder(0);
        let loaded = load_network_str(yaml, Format::Yaml, &registry, &mut builder)?;
        Ok((builder.build(), loaded))
    }

    const SIMPLE: &str = "
DEFAULT:
  msg_size_key: size_mbits
Traffic:
  type: RandomDataSource
  max_messages: 3
  random_delay_min: 1
  random_delay_max: 2
  Downlink: ~
Downlink:
  type: DelaySize
  rate_per_mbit: 10
  Drain: ~
Drain:
  type: Sink
";

    #[test]
    fn test_simple_chain_loads_and_runs() {
        let (mut sim, loaded) = build(SIMPLE).unwrap();
        assert_eq!(loaded.node_count, 3);
        sim.run_until(SimTime::from_secs(1000.0)).unwrap();

        // all three messages flowed source -> delay -> sink
        assert_eq!(sim.history().len(), 3);
        for (_, hops) in sim.history().iter() {
            assert_eq!(hops.last().unwrap().to, "Drain");
        }
    }

    #[test]
    fn test_default_section_inherited() {
        let (sim, _) = build(
            "
DEFAULT:
  rate_per_mbit: 25
A:
  type: DelaySize
  B: ~
B:
  type: Sink
",
        )
        .unwrap();
        let node = sim.nodes().iter().find(|n| n.label == "A").unwrap();
        assert_eq!(node.config.f64("rate_per_mbit"), Some(25.0));
    }

    #[test]
    fn test_own_keys_beat_default() {
        let (sim, _) = build(
            "
DEFAULT:
  rate_per_mbit: 25
A:
  type: DelaySize
  rate_per_mbit: 50
  B: ~
B:
  type: Sink
",
        )
        .unwrap();
        let node = sim.nodes().iter().find(|n| n.label == "A").unwrap();
        assert_eq!(node.config.f64("rate_per_mbit"), Some(50.0));
    }

    #[test]
    fn test_unknown_type_lists_known_tags() {
        let err = build("A:\n  type: warpdrive\n").unwrap_err();
        match err {
            ModelError::UnknownNodeType { tag, known, .. } => {
                assert_eq!(tag, "warpdrive");
                assert!(known.contains(&"delaysize".to_string()));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_type_is_fatal() {
        assert!(matches!(
            build("A:\n  rate_per_mbit: 10\n"),
            Err(ModelError::MissingType { .. })
        ));
    }

    #[test]
    fn test_bad_predicate_edge_is_fatal() {
        let err = build(
            "
A:
  type: RandomDataSource
  B: \"total gibberish\"
B:
  type: Sink
",
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Condition { .. }));
    }

    #[test]
    fn test_predicate_edges_compile_and_route() {
        let (mut sim, _) = build(
            "
Traffic:
  type: RandomDataSource
  max_messages: 10
  random_size_min: 10
  random_size_max: 100
  random_delay_min: 1
  random_delay_max: 1.5
  Big: \"size_mbits >= 55\"
  Small: \"size_mbits < 55\"
Big:
  type: Sink
Small:
  type: Sink
",
        )
        .unwrap();
        sim.run_until(SimTime::from_secs(1000.0)).unwrap();

        let tally = |label: &str| {
            sim.nodes()
                .iter()
                .find(|n| n.label == label)
                .unwrap()
                .tally
                .msgs_processed
        };
        // every message went one way or the other, never both
        assert_eq!(tally("Big") + tally("Small"), 10);
    }

    #[test]
    fn test_meta_node_namespaces_and_overrides() {
        // scenario: parent override rewrites a sub-node's base rate
        let (sim, loaded) = build(
            "
Constellation:
  type: MetaNode
  source_type: json
  source:
    Sub:
      type: DelaySize
      rate_per_mbit: 10
    Drain:
      type: Sink
  overrides:
    Sub:
      rate_per_mbit: 5
",
        )
        .unwrap();

        let sub = sim
            .nodes()
            .iter()
            .find(|n| n.label == "Constellation/Sub")
            .expect("sub-node namespaced under the meta label");
        assert_eq!(sub.config.f64("rate_per_mbit"), Some(5.0));
        assert_eq!(sim.metas().len(), 1);
        // two documents captured: top-level and the meta's sub-graph
        assert_eq!(loaded.documents.len(), 2);
    }

    #[test]
    fn test_meta_override_unknown_target_is_fatal() {
        let err = build(
            "
Constellation:
  type: MetaNode
  source_type: json
  source:
    Sub:
      type: Sink
  overrides:
    Ghost:
      rate_per_mbit: 5
",
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::UnknownOverrideTarget { .. }));
    }

    #[test]
    fn test_outer_scope_can_address_meta_sub_nodes() {
        let (mut sim, _) = build(
            "
Traffic:
  type: RandomDataSource
  max_messages: 2
  random_delay_min: 1
  random_delay_max: 2
  Ground/Drain: ~
Ground:
  type: MetaNode
  source_type: json
  source:
    Drain:
      type: Sink
",
        )
        .unwrap();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();
        let drain = sim
            .nodes()
            .iter()
            .find(|n| n.label == "Ground/Drain")
            .unwrap();
        assert_eq!(drain.tally.msgs_processed, 2);
    }

    #[test]
    fn test_meta_propagator_feeds_position_reports() {
        let (mut sim, _) = build(
            "
Station:
  type: MetaNode
  source_type: json
  source:
    Beacon:
      type: PositionReport
      frequency: 5
      Drain: ~
    Drain:
      type: Sink
  propagator:
    type: geopoint
    Lat_deg: 19.82
    Lon_deg: -155.47
    Alt_km: 4.2
",
        )
        .unwrap();
        sim.run_until(SimTime::from_secs(20.0)).unwrap();
        let beacon = sim
            .nodes()
            .iter()
            .find(|n| n.label == "Station/Beacon")
            .unwrap();
        assert!(beacon.tally.msgs_processed > 0);
    }

    #[test]
    fn test_round_trip_through_loaded_document() {
        let (_, loaded) = build(SIMPLE).unwrap();
        let text = serde_json::to_string(&loaded.documents[0]).unwrap();

        let registry = NodeRegistry::builtin();
        let mut builder = Simulation::builder(0);
        let reloaded = load_network_str(&text, Format::Json, &registry, &mut builder).unwrap();
        let sim = builder.build();

        assert_eq!(reloaded.node_count, 3);
        let labels: Vec<&str> = sim.nodes().iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, ["Traffic", "Downlink", "Drain"]);
        // the edge survives: Traffic's config still names Downlink
        let traffic = &sim.nodes()[0];
        assert!(traffic.config.contains("Downlink"));
    }

    #[test]
    fn test_ini_description_loads() {
        let registry = NodeRegistry::builtin();
        let mut builder = Simulation::builder(0);
        let text = "
[traffic]
type = RandomDataSource
max_messages = 2
drain =

[drain]
type = Sink
";
        let loaded = load_network_str(text, Format::Ini, &registry, &mut builder).unwrap();
        assert_eq!(loaded.node_count, 2);
        let mut sim = builder.build();
        sim.run_until(SimTime::from_secs(100.0)).unwrap();
        let drain = sim
            .nodes()
            .iter()
            .find(|n| n.label.eq_ignore_ascii_case("drain"))
            .unwrap();
        assert_eq!(drain.tally.msgs_processed, 2);
    }
}
