//! Parsing network descriptions.
//!
//! All three accepted formats parse to the same shape: an ordered mapping
//! `label -> config`. YAML and JSON preserve file order, which fixes node
//! instantiation and edge-attachment order; INI sections come back from the
//! parser unordered and are therefore sorted by label.

use crate::ModelError;
use astrons_core::{AttrValue, Config};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::Path;

/// An ordered `label -> config` mapping.
pub type Description = IndexMap<String, Config>;

/// Accepted description formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Ini,
}

impl Format {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Result<Format, ModelError> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("yml") | Some("yaml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            Some("ini") => Ok(Format::Ini),
            other => Err(ModelError::UnknownFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Parse a description from text. `what` names the source in errors.
pub fn parse_description(
    text: &str,
    format: Format,
    what: &str,
) -> Result<Description, ModelError> {
    let parse_err = |reason: String| ModelError::Parse {
        what: what.to_string(),
        format,
        reason,
    };

    match format {
        Format::Yaml => {
            let raw: IndexMap<String, Option<Config>> =
                serde_yaml::from_str(text).map_err(|e| parse_err(e.to_string()))?;
            Ok(normalize(raw))
        }
        Format::Json => {
            let raw: IndexMap<String, Option<Config>> =
                serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
            Ok(normalize(raw))
        }
        Format::Ini => {
            let parsed = config::Config::builder()
                .add_source(config::File::from_str(text, config::FileFormat::Ini))
                .build()
                .map_err(|e| parse_err(e.to_string()))?;
            let sections: BTreeMap<String, BTreeMap<String, String>> = parsed
                .try_deserialize()
                .map_err(|e| parse_err(e.to_string()))?;
            Ok(sections
                .into_iter()
                .map(|(label, entries)| {
                    let config = entries
                        .into_iter()
                        .map(|(k, v)| {
                            let value = if v.is_empty() {
                                AttrValue::Null
                            } else {
                                AttrValue::String(v)
                            };
                            (k, value)
                        })
                        .collect();
                    (label, config)
                })
                .collect())
        }
    }
}

fn normalize(raw: IndexMap<String, Option<Config>>) -> Description {
    raw.into_iter()
        .map(|(label, config)| (label.trim().to_string(), config.unwrap_or_default()))
        .collect()
}

/// Read and parse a description file, picking the format by extension.
pub fn load_description_file(path: &Path) -> Result<Description, ModelError> {
    let format = Format::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_description(&text, format, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_preserves_order() {
        let desc = parse_description(
            "Zulu:\n  type: sink\nAlpha:\n  type: sink\n",
            Format::Yaml,
            "test",
        )
        .unwrap();
        let labels: Vec<&String> = desc.keys().collect();
        assert_eq!(labels, ["Zulu", "Alpha"]);
    }

    #[test]
    fn test_yaml_null_config_is_empty() {
        let desc = parse_description("Lonely: ~\n", Format::Yaml, "test").unwrap();
        assert!(desc["Lonely"].is_empty());
    }

    #[test]
    fn test_json_and_yaml_agree() {
        let yaml = parse_description(
            "A:\n  type: delaysize\n  rate_per_mbit: 10\n  B: ~\nB:\n  type: sink\n",
            Format::Yaml,
            "test",
        )
        .unwrap();
        let json = parse_description(
            r#"{"A": {"type": "delaysize", "rate_per_mbit": 10, "B": null}, "B": {"type": "sink"}}"#,
            Format::Json,
            "test",
        )
        .unwrap();
        assert_eq!(yaml, json);
    }

    #[test]
    fn test_ini_sections_sorted() {
        let text = "[zulu]\ntype = sink\n\n[alpha]\ntype = sink\nzulu =\n";
        let desc = parse_description(text, Format::Ini, "test").unwrap();
        let labels: Vec<&String> = desc.keys().collect();
        assert_eq!(labels, ["alpha", "zulu"]);
        assert_eq!(desc["alpha"].str("type"), Some("sink"));
        // empty INI values read as null: an unconditional edge
        assert!(desc["alpha"].get("zulu").unwrap().is_null());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(matches!(
            Format::from_path(Path::new("model.toml")),
            Err(ModelError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        assert!(matches!(
            parse_description(": : :", Format::Yaml, "test"),
            Err(ModelError::Parse { .. })
        ));
    }
}
