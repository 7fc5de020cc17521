// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured node identifiers.
//!
//! A node is named by a set of `(domain, value)` key pairs, such as
//! `{market: bananas, location: recife}`. Two names are equal when they
//! contain the same keys, regardless of the order a client listed them
//! in; the canonical form orders keys by domain.

use beacon_core::{ObjectBuilder, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// The name space a key lives in (`p1`, `market`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyDomain(String);

impl KeyDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyDomain {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for KeyDomain {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One `(domain, value)` pair of a node name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    domain: KeyDomain,
    value: String,
}

impl Key {
    pub fn new(domain: impl Into<KeyDomain>, value: impl Into<String>) -> Self {
        Self { domain: domain.into(), value: value.into() }
    }

    pub const fn domain(&self) -> &KeyDomain {
        &self.domain
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.value)
    }
}

/// A name is built from a JSON object; only scalar member values can form
/// keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("node name must be an object")]
    NotAnObject,
    #[error("node name must not be empty")]
    Empty,
    #[error("key {0:?} must have a string, number or boolean value")]
    UnsupportedKeyValue(String),
}

/// The identifier of a data node: an ordered set of keys with unique
/// domains.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeName {
    keys: BTreeMap<KeyDomain, String>,
}

impl NodeName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key, replacing any prior key of the same domain.
    #[must_use]
    pub fn with_key(mut self, key: Key) -> Self {
        self.keys.insert(key.domain, key.value);
        self
    }

    /// Builds a name from a JSON object; member values are stringified.
    ///
    /// # Errors
    ///
    /// Rejects non-objects, the empty object, and members whose value is
    /// not a string, number or boolean.
    pub fn from_value(value: &Value) -> Result<Self, NameError> {
        let members = value.as_object().ok_or(NameError::NotAnObject)?;
        if members.is_empty() {
            return Err(NameError::Empty);
        }

        let mut keys = BTreeMap::new();
        for (domain, val) in members {
            let text = match val {
                Value::String(s) => s.to_string(),
                Value::Int(_) | Value::Float(_) | Value::Bool(_) => val.to_json(),
                _ => return Err(NameError::UnsupportedKeyValue(domain.clone())),
            };
            keys.insert(KeyDomain::new(domain.clone()), text);
        }

        Ok(Self { keys })
    }

    /// The canonical JSON form: an object with keys ordered by domain.
    pub fn to_value(&self) -> Value {
        let mut builder = ObjectBuilder::new();
        for (domain, value) in &self.keys {
            builder = builder.insert(domain.as_str(), value.as_str());
        }
        builder.build()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn contains_domain(&self, domain: &KeyDomain) -> bool {
        self.keys.contains_key(domain)
    }

    pub fn value_of(&self, domain: &KeyDomain) -> Option<&str> {
        self.keys.get(domain).map(String::as_str)
    }

    /// Iterates keys in canonical (domain) order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys.iter().map(|(d, v)| Key::new(d.clone(), v.clone()))
    }

    /// Maps the name onto one of `groups` partitions; equal names always
    /// land in the same partition and distinct names spread evenly.
    pub fn partition(&self, groups: usize) -> usize {
        if groups == 0 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        usize::try_from(hasher.finish() % groups as u64).unwrap_or(0)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (domain, value)) in self.keys.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{domain}:{value}")?;
        }
        write!(f, "}}")
    }
}

/// A predicate over node names: "contains these domains" plus "contains
/// these exact keys". The empty group matches every name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeGroup {
    domains: BTreeSet<KeyDomain>,
    keys: BTreeMap<KeyDomain, String>,
}

impl NodeGroup {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_domain(mut self, domain: impl Into<KeyDomain>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    #[must_use]
    pub fn has_key(mut self, key: Key) -> Self {
        self.keys.insert(key.domain, key.value);
        self
    }

    pub fn in_group(&self, name: &NodeName) -> bool {
        self.domains.iter().all(|d| name.contains_domain(d))
            && self.keys.iter().all(|(d, v)| name.value_of(d) == Some(v.as_str()))
    }
}

impl fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let domains: Vec<String> = self.domains.iter().map(ToString::to_string).collect();
        let keys: Vec<String> =
            self.keys.iter().map(|(d, v)| format!("{d}:{v}")).collect();
        write!(f, "group(domains: [{}], keys: [{}])", domains.join(", "), keys.join(", "))
    }
}

/// Starts a [`NodeGroup`] chain.
pub fn build_node_group() -> NodeGroup {
    NodeGroup::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> NodeName {
        NodeName::from_value(&Value::from_json(text).expect("valid json"))
            .expect("valid node name")
    }

    #[test]
    fn equality_ignores_insertion_order() {
        assert_eq!(name(r#"{"a":2,"b":4}"#), name(r#"{"b":4,"a":2}"#));
        assert_ne!(name(r#"{"a":2,"b":4}"#), name(r#"{"a":4,"b":2}"#));
    }

    #[test]
    fn canonical_form_orders_by_domain() {
        assert_eq!(name(r#"{"z":"1","a":"2"}"#).to_value().to_json(), r#"{"a":"2","z":"1"}"#);
    }

    #[test]
    fn scalar_key_values_are_stringified() {
        let n = name(r#"{"a":2,"b":"x","c":true}"#);
        assert_eq!(n.value_of(&KeyDomain::new("a")), Some("2"));
        assert_eq!(n.value_of(&KeyDomain::new("b")), Some("x"));
        assert_eq!(n.value_of(&KeyDomain::new("c")), Some("true"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let parse = |t| Value::from_json(t).expect("valid json");
        assert_eq!(NodeName::from_value(&parse("[1]")), Err(NameError::NotAnObject));
        assert_eq!(NodeName::from_value(&parse("{}")), Err(NameError::Empty));
        assert_eq!(
            NodeName::from_value(&parse(r#"{"a":[1]}"#)),
            Err(NameError::UnsupportedKeyValue("a".to_owned()))
        );
    }

    #[test]
    fn domain_filtering() {
        let filter_all_a = build_node_group().has_domain("a");
        let filter_a_and_b = build_node_group().has_domain("a").has_domain("b");

        let a2_b4 = name(r#"{"a":2,"b":4}"#);
        let a4_c2 = name(r#"{"a":4,"c":2}"#);
        let b2_c2 = name(r#"{"c":2,"b":2}"#);

        assert!(filter_all_a.in_group(&a2_b4));
        assert!(filter_all_a.in_group(&a4_c2));
        assert!(!filter_all_a.in_group(&NodeName::new()));
        assert!(!filter_all_a.in_group(&b2_c2));

        assert!(filter_a_and_b.in_group(&a2_b4));
        assert!(!filter_a_and_b.in_group(&a4_c2));
    }

    #[test]
    fn key_filtering() {
        let filter_a4 = build_node_group().has_key(Key::new("a", "4"));

        assert!(!filter_a4.in_group(&name(r#"{"a":2,"b":4}"#)));
        assert!(filter_a4.in_group(&name(r#"{"a":4,"b":2}"#)));
        assert!(filter_a4.in_group(&name(r#"{"a":4,"c":2}"#)));
    }

    #[test]
    fn combined_domain_and_key_filtering() {
        let filter = build_node_group().has_domain("a").has_key(Key::new("b", "2"));

        assert!(filter.in_group(&name(r#"{"a":4,"b":2}"#)));
        assert!(!filter.in_group(&name(r#"{"a":2,"b":4}"#)));
        assert!(!filter.in_group(&name(r#"{"b":2,"c":2}"#)));
    }

    #[test]
    fn empty_group_matches_everything() {
        assert!(NodeGroup::new().in_group(&name(r#"{"a":1}"#)));
    }

    #[test]
    fn partitioning_is_stable_and_in_range() {
        let n = name(r#"{"a":1,"b":2}"#);
        let p = n.partition(8);
        assert!(p < 8);
        assert_eq!(p, name(r#"{"b":2,"a":1}"#).partition(8));
        assert_eq!(n.partition(0), 0);
    }
}
