//! Per-node configuration map.
//!
//! A node's configuration is the key/value block under its label in the
//! network description. Key order is preserved: keys naming other nodes are
//! edges, and edge attachment order decides delivery order among same-time
//! siblings, so it has to be stable.

use crate::value::AttrValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered key/value configuration for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    entries: IndexMap<String, AttrValue>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Numeric value under `key`, coerced the loose way (numeric strings
    /// parse, booleans map to 1/0).
    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AttrValue::to_number)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.f64(key).map(|v| v as i64)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(AttrValue::to_flag)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttrValue::as_str)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn list(&self, key: &str) -> Option<&Vec<AttrValue>> {
        self.get(key).and_then(AttrValue::as_list)
    }

    /// The node-kind tag, lowercased; every node block must carry one.
    pub fn type_tag(&self) -> Option<String> {
        self.str("type").map(|t| t.trim().to_ascii_lowercase())
    }

    /// Later keys win; used for DEFAULT inheritance and meta overrides.
    pub fn merged_under(&self, over: &Config) -> Config {
        let mut out = self.clone();
        for (k, v) in over.iter() {
            out.entries.insert(k.clone(), v.clone());
        }
        out
    }
}

impl FromIterator<(String, AttrValue)> for Config {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Config {
            entries: iter.into_iter().collect(),
        }
    }
}
