//! The message envelope.
//!
//! A message is an open attribute map. A handful of attribute names are
//! reserved by the runtime (see [`keys`]); everything else belongs to the
//! nodes that produce and consume the message. Receivers own their copy and
//! may mutate it freely; the router clones per delivery.

use crate::value::AttrValue;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved attribute names.
pub mod keys {
    /// Unique message identifier, assigned at creation and carried verbatim.
    pub const ID: &str = "ID";
    /// Virtual time at which the last emitting node released the message.
    pub const TIME_SENT: &str = "time_sent";
    /// Label of the last emitting node.
    pub const LAST_NODE: &str = "last_node";
    /// Default name of the numeric payload-size attribute.
    pub const DEFAULT_SIZE: &str = "size_mbits";
    /// Integer in [0, 100] injected by the router for percentage predicates.
    pub const RANDOM_ROUTER_VALUE: &str = "random_router_value";
    /// Scheduler `now` at emission, injected by the router.
    pub const SIM_TIME_ATTR: &str = "__SimTime__";
    /// Pseudo-field name resolving to the event's virtual time in predicates.
    pub const SIM_TIME_FIELD: &str = "SimTime";
}

/// An untyped attribute bag with a reserved-key convention.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    attrs: BTreeMap<String, AttrValue>,
}

impl Message {
    /// An empty message with no attributes, not even an ID.
    pub fn empty() -> Self {
        Message::default()
    }

    /// A message carrying the given ID.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut msg = Message::default();
        msg.set(keys::ID, AttrValue::String(id.into()));
        msg
    }

    /// A message with a fresh UUIDv4 identifier drawn from `rng`.
    ///
    /// Drawing the bytes from the simulation RNG keeps IDs reproducible for a
    /// given seed.
    pub fn with_generated_id<R: Rng>(rng: &mut R) -> Self {
        let bytes: [u8; 16] = rng.gen();
        let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
        Message::with_id(id.to_string())
    }

    pub fn id(&self) -> &str {
        self.attrs
            .get(keys::ID)
            .and_then(AttrValue::as_str)
            .unwrap_or("<no-id>")
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.attrs.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.attrs.iter()
    }

    /// Numeric payload size under the given key, zero when absent.
    pub fn size(&self, size_key: &str) -> f64 {
        self.attrs
            .get(size_key)
            .and_then(AttrValue::to_number)
            .unwrap_or(0.0)
    }

    /// `time_sent`, or `None` for a message that has not been emitted yet.
    pub fn time_sent(&self) -> Option<f64> {
        self.attrs.get(keys::TIME_SENT).and_then(AttrValue::as_f64)
    }

    pub fn last_node(&self) -> Option<&str> {
        self.attrs.get(keys::LAST_NODE).and_then(AttrValue::as_str)
    }

    /// Single-line JSON rendering, used by the history artifacts.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.attrs).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, AttrValue)> for Message {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Message {
            attrs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_id_and_size() {
        let mut msg = Message::with_id("abc");
        msg.set(keys::DEFAULT_SIZE, 100.0);
        assert_eq!(msg.id(), "abc");
        assert_eq!(msg.size(keys::DEFAULT_SIZE), 100.0);
        assert_eq!(msg.size("other_key"), 0.0);
    }

    #[test]
    fn test_generated_ids_are_seed_stable() {
        let mut a = rand_pcg_like();
        let mut b = rand_pcg_like();
        assert_eq!(
            Message::with_generated_id(&mut a).id(),
            Message::with_generated_id(&mut b).id()
        );
    }

    fn rand_pcg_like() -> impl rand::Rng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_size_coerces_strings() {
        let mut msg = Message::with_id("x");
        msg.set("size_mbits", "12.5");
        assert_eq!(msg.size("size_mbits"), 12.5);
    }
}
