//! Meta-node source resolution.
//!
//! A meta-node's configuration names where its sub-graph description comes
//! from (`source`) and how to read it (`source_type`): a file on disk, an
//! inline/JSON-string document, or a REST endpoint fetched at load time.

use crate::description::{load_description_file, parse_description, Description, Format};
use crate::ModelError;
use astrons_core::{AttrValue, Config};

/// Resolve a meta-node's sub-graph description.
pub fn resolve_source(label: &str, config: &Config) -> Result<Description, ModelError> {
    let source = config.get("source").ok_or_else(|| ModelError::Meta {
        label: label.to_string(),
        reason: "source field not set".to_string(),
    })?;
    let source_type = config.str("source_type").unwrap_or("file");

    match source_type {
        "file" => {
            let path = source.as_str().ok_or_else(|| ModelError::Meta {
                label: label.to_string(),
                reason: "file source must be a path string".to_string(),
            })?;
            tracing::info!(meta = label, path, "loading meta-node sub-graph from file");
            load_description_file(std::path::Path::new(path))
        }
        "json" => match source {
            AttrValue::String(text) => parse_description(text, Format::Json, label),
            AttrValue::Map(entries) => {
                // inline document: each value must itself be a map
                let mut description = Description::new();
                for (sub_label, sub_config) in entries {
                    match sub_config {
                        AttrValue::Map(inner) => {
                            let config: Config = inner
                                .iter()
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect();
                            description.insert(sub_label.clone(), config);
                        }
                        AttrValue::Null => {
                            description.insert(sub_label.clone(), Config::new());
                        }
                        _ => {
                            return Err(ModelError::Meta {
                                label: label.to_string(),
                                reason: format!(
                                    "inline source entry '{}' is not a mapping",
                                    sub_label
                                ),
                            })
                        }
                    }
                }
                Ok(description)
            }
            _ => Err(ModelError::Meta {
                label: label.to_string(),
                reason: "json source must be a string or inline mapping".to_string(),
            }),
        },
        "rest" => {
            let url = source.as_str().ok_or_else(|| ModelError::Meta {
                label: label.to_string(),
                reason: "rest source must be a URL string".to_string(),
            })?;
            tracing::info!(meta = label, url, "loading meta-node sub-graph over REST");
            let text = reqwest::blocking::get(url)
                .and_then(|response| response.error_for_status())
                .and_then(|response| response.text())
                .map_err(|e| ModelError::Meta {
                    label: label.to_string(),
                    reason: format!("REST fetch failed: {}", e),
                })?;
            parse_description(&text, Format::Json, label)
        }
        other => Err(ModelError::Meta {
            label: label.to_string(),
            reason: format!("unsupported source type '{}'", other),
        }),
    }
}

/// The meta-node's per-sub-node override table.
pub fn overrides_of(label: &str, config: &Config) -> Result<Vec<(String, Config)>, ModelError> {
    match config.get("overrides") {
        None | Some(AttrValue::Null) => Ok(Vec::new()),
        Some(AttrValue::Map(entries)) => {
            let mut overrides = Vec::new();
            for (target, value) in entries {
                match value {
                    AttrValue::Map(inner) => overrides.push((
                        target.clone(),
                        inner.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    )),
                    _ => {
                        return Err(ModelError::Meta {
                            label: label.to_string(),
                            reason: format!("override for '{}' is not a mapping", target),
                        })
                    }
                }
            }
            Ok(overrides)
        }
        Some(_) => Err(ModelError::Meta {
            label: label.to_string(),
            reason: "overrides must be a mapping".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_source_is_fatal() {
        let config = Config::new();
        assert!(matches!(
            resolve_source("Constellation", &config),
            Err(ModelError::Meta { .. })
        ));
    }

    #[test]
    fn test_json_string_source() {
        let mut config = Config::new();
        config.insert("source", r#"{"Relay": {"type": "delaytime"}}"#);
        config.insert("source_type", "json");
        let description = resolve_source("Constellation", &config).unwrap();
        assert_eq!(description["Relay"].str("type"), Some("delaytime"));
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "Relay:\n  type: delaytime").unwrap();
        file.flush().unwrap();

        let mut config = Config::new();
        config.insert("source", file.path().to_str().unwrap());
        let description = resolve_source("Constellation", &config).unwrap();
        assert!(description.contains_key("Relay"));
    }

    #[test]
    fn test_overrides_parse() {
        let yaml = "overrides:\n  Sub:\n    rate_per_mbit: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let overrides = overrides_of("M", &config).unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].0, "Sub");
        assert_eq!(overrides[0].1.f64("rate_per_mbit"), Some(5.0));
    }

    #[test]
    fn test_bad_overrides_shape() {
        let mut config = Config::new();
        config.insert("overrides", "not a map");
        assert!(overrides_of("M", &config).is_err());
    }
}
