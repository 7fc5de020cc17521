// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Versioned node data.
//!
//! A [`VersionedNode`] keeps the current value of a node plus a bounded
//! history of the edit scripts that produced it, so a client that is a few
//! versions behind can be brought current with a small update instead of a
//! full retransmission.

use beacon_core::{delta, Value};
use std::collections::VecDeque;
use std::fmt;

/// A monotonically increasing node version. Opaque to clients; they echo
/// it back in `"version"`/`"from"` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeVersion(u64);

impl NodeVersion {
    pub const fn initial() -> Self {
        Self(1)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The version `steps` before this one, saturating at zero.
    #[must_use]
    pub const fn back(self, steps: u64) -> Self {
        Self(self.0.saturating_sub(steps))
    }

    pub fn to_value(self) -> Value {
        i64::try_from(self.0).map_or(Value::Null, Value::Int)
    }

    /// Reads a version a client echoed back. Anything but a number it
    /// previously received is treated as unknown.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|n| u64::try_from(n).ok()).map(Self)
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct HistoryEntry {
    /// The version this entry's script upgrades *from* (to `from.next()`).
    from: NodeVersion,
    script: Value,
    size: usize,
}

/// Current value, version counter, and the recent edit history.
pub struct VersionedNode {
    data: Value,
    version: NodeVersion,
    oldest: NodeVersion,
    history: VecDeque<HistoryEntry>,
}

impl VersionedNode {
    pub fn new(initial: Value) -> Self {
        Self {
            data: initial,
            version: NodeVersion::initial(),
            oldest: NodeVersion::initial(),
            history: VecDeque::new(),
        }
    }

    pub const fn data(&self) -> &Value {
        &self.data
    }

    pub const fn current_version(&self) -> NodeVersion {
        self.version
    }

    pub const fn oldest_version(&self) -> NodeVersion {
        self.oldest
    }

    /// Replaces the current value. Returns `false` (and changes nothing)
    /// when `new_value` equals the current value.
    ///
    /// On change the version is bumped and the edit script from the old to
    /// the new value is recorded; the history is then pruned from the
    /// front until the summed script bytes fit into `budget`. An update
    /// whose delta does not fit the budget breaks the history chain:
    /// older clients have to be re-seeded with the full value.
    pub fn update(&mut self, new_value: &Value, budget: usize) -> bool {
        if *new_value == self.data {
            return false;
        }

        let (scripted, script) = delta(&self.data, new_value, budget);

        self.data = new_value.clone();
        self.version = self.version.next();

        if scripted {
            let size = script.serialized_size();
            self.history.push_back(HistoryEntry {
                from: self.version.back(1),
                script,
                size,
            });
        } else {
            self.history.clear();
            self.oldest = self.version;
        }

        while self.history_bytes() > budget {
            self.history.pop_front();
        }
        if let Some(front) = self.history.front() {
            self.oldest = front.from;
        } else {
            self.oldest = self.version;
        }

        true
    }

    /// The update bringing a client at version `from` current.
    ///
    /// `(true, script)` when the history still covers `from`; the script
    /// is the concatenation of the per-step scripts, which composes to
    /// the current value. `(false, current_value)` when the client is too
    /// far behind (or was never seeded) and must re-initialize.
    pub fn get_update_from(&self, from: NodeVersion) -> (bool, Value) {
        if from >= self.version || from < self.oldest {
            return (false, self.data.clone());
        }

        let mut composed: Vec<Value> = Vec::new();
        for entry in self.history.iter().filter(|e| e.from >= from) {
            match entry.script.as_array() {
                Some(ops) => composed.extend(ops.iter().cloned()),
                None => return (false, self.data.clone()),
            }
        }

        (true, Value::array(composed))
    }

    fn history_bytes(&self) -> usize {
        self.history.iter().map(|e| e.size).sum()
    }
}

impl fmt::Debug for VersionedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedNode")
            .field("version", &self.version)
            .field("oldest", &self.oldest)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::apply;

    fn parse(text: &str) -> Value {
        Value::from_json(text).expect("test input parses")
    }

    fn check_update(from: &Value, to: &Value, update: (bool, Value)) -> bool {
        let (is_update, script) = update;
        is_update && apply(from, &script).expect("script applies") == *to
    }

    #[test]
    fn fresh_node_has_no_history() {
        let node = VersionedNode::new(parse("\"hallo\""));
        assert_eq!(node.current_version(), node.oldest_version());
        assert_eq!(*node.data(), parse("\"hallo\""));
        assert_eq!(node.get_update_from(node.current_version()), (false, parse("\"hallo\"")));
        assert_eq!(
            node.get_update_from(node.current_version().back(5)),
            (false, parse("\"hallo\""))
        );
    }

    #[test]
    fn updates_accumulate_history() {
        let v1 = parse("[1,2,3,4,5,6,7,8,10]");
        let v2 = parse("[1,3,4,5,6,7,8,10]");
        let v3 = parse("[]");
        let v4 = parse("[1]");

        let first_version = NodeVersion::initial();
        let mut node = VersionedNode::new(v1.clone());

        assert!(node.update(&v2, 1000));
        assert_eq!(*node.data(), v2);
        assert_eq!(node.current_version(), first_version.next());
        assert_eq!(node.oldest_version(), first_version);
        assert!(check_update(&v1, &v2, node.get_update_from(first_version)));

        assert!(node.update(&v3, 1_000_000));
        assert!(node.update(&v4, 1_000_000));

        assert_eq!(*node.data(), v4);
        assert_eq!(node.oldest_version(), first_version);

        let current = node.current_version();
        assert!(check_update(&v3, &v4, node.get_update_from(current.back(1))));
        assert!(check_update(&v2, &v4, node.get_update_from(current.back(2))));
        assert!(check_update(&v1, &v4, node.get_update_from(current.back(3))));
    }

    #[test]
    fn equal_value_is_a_no_op() {
        let v1 = parse("[1,2,3]");
        let mut node = VersionedNode::new(v1.clone());
        let version = node.current_version();

        assert!(!node.update(&v1, 0));
        assert!(!node.update(&v1, 100_000));
        assert_eq!(node.current_version(), version);
        assert_eq!(node.oldest_version(), version);
    }

    #[test]
    fn history_is_pruned_to_the_byte_budget() {
        let v1 = parse("[1,2,3,4,5,6,7,8,10]");
        let v2 = parse("[1,3,4,5,6,7,8,10]");

        let mut node = VersionedNode::new(v1.clone());
        let mut current = node.current_version();

        // each toggle costs a handful of bytes; a tight budget keeps only
        // the most recent step alive
        for i in 0..20 {
            let (new_value, old_value) =
                if i % 2 == 0 { (&v2, &v1) } else { (&v1, &v2) };

            assert!(node.update(new_value, 8));
            current = current.next();

            assert_eq!(node.current_version(), current);
            assert_eq!(node.oldest_version(), current.back(1));
            assert!(check_update(old_value, new_value, node.get_update_from(current.back(1))));
            assert_eq!(node.get_update_from(current.back(2)), (false, new_value.clone()));
        }
    }

    #[test]
    fn oversized_delta_breaks_the_chain() {
        let v1 = parse("[1]");
        let v2 = parse(r#"["aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"]"#);

        let mut node = VersionedNode::new(v1);
        assert!(node.update(&v2, 10));

        assert_eq!(node.oldest_version(), node.current_version());
        assert_eq!(
            node.get_update_from(node.current_version().back(1)),
            (false, v2.clone())
        );
    }

    #[test]
    fn every_covered_version_yields_a_script() {
        let mut node = VersionedNode::new(parse("[10,20,30]"));
        let start = node.current_version();

        assert!(node.update(&parse("[40,20,30]"), 1000));
        assert!(node.update(&parse("[40,50,30]"), 1000));
        assert!(node.update(&parse("[40,50,60]"), 1000));

        let steps = ["[10,20,30]", "[40,20,30]", "[40,50,30]"].map(parse);
        let mut version = start;
        for old_value in &steps {
            let (is_update, script) = node.get_update_from(version);
            assert!(is_update, "version {version} should be covered");
            assert_eq!(apply(old_value, &script).expect("script applies"), *node.data());
            version = version.next();
        }
    }

    #[test]
    fn unknown_versions_force_reinitialization() {
        let mut node = VersionedNode::new(parse("[1]"));
        node.update(&parse("[2]"), 1000);

        // a version from the future
        let future = node.current_version().next();
        assert_eq!(node.get_update_from(future), (false, parse("[2]")));
    }
}
