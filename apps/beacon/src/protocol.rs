// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared protocol plumbing: the channel ⇄ node-name mapping and the
//! error strings both responders use.

use beacon_pubsub::{Key, NodeName};

pub const ERR_INVALID_NODE: &str = "invalid node";
pub const ERR_NOT_AUTHORIZED: &str = "not authorized";
pub const ERR_INIT_FAILED: &str = "initialization failed";
pub const ERR_NOT_SUBSCRIBED: &str = "not subscribed";

/// Maps a Bayeux application channel onto a node name: `/a/b/c` becomes
/// `{p1: a, p2: b, p3: c}`.
///
/// Meta channels, empty segments and the bare root are not node names.
pub fn channel_to_node_name(channel: &str) -> Option<NodeName> {
    let path = channel.strip_prefix('/')?;
    if path.is_empty() || channel.starts_with("/meta/") {
        return None;
    }

    let mut name = NodeName::new();
    for (position, segment) in path.split('/').enumerate() {
        if segment.is_empty() {
            return None;
        }
        name = name.with_key(Key::new(format!("p{}", position + 1), segment));
    }
    Some(name)
}

/// The inverse mapping: positional `pN` domains back to `/a/b/c`.
///
/// Names with other domains came in through the native protocol and have
/// no channel form; they render as their canonical JSON instead.
pub fn node_name_to_channel(name: &NodeName) -> String {
    let mut segments: Vec<(usize, String)> = Vec::with_capacity(name.len());
    for key in name.keys() {
        let Some(position) = key
            .domain()
            .as_str()
            .strip_prefix('p')
            .and_then(|n| n.parse::<usize>().ok())
        else {
            return name.to_value().to_json();
        };
        segments.push((position, key.value().to_owned()));
    }

    segments.sort_by_key(|(position, _)| *position);

    let mut channel = String::new();
    for (_, value) in segments {
        channel.push('/');
        channel.push_str(&value);
    }
    channel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_map_to_positional_domains() {
        let name = channel_to_node_name("/foo/bar").expect("valid channel");
        assert_eq!(name.to_value().to_json(), r#"{"p1":"foo","p2":"bar"}"#);
    }

    #[test]
    fn meta_channels_are_not_nodes() {
        assert!(channel_to_node_name("/meta/connect").is_none());
        assert!(channel_to_node_name("").is_none());
        assert!(channel_to_node_name("/").is_none());
        assert!(channel_to_node_name("/a//b").is_none());
        assert!(channel_to_node_name("no-slash").is_none());
    }

    #[test]
    fn channel_mapping_round_trips() {
        for channel in ["/foo", "/foo/bar", "/a/b/c/d"] {
            let name = channel_to_node_name(channel).expect("valid channel");
            assert_eq!(node_name_to_channel(&name), channel);
        }
    }

    #[test]
    fn ten_or_more_segments_keep_positional_order() {
        let channel = "/a/b/c/d/e/f/g/h/i/j/k";
        let name = channel_to_node_name(channel).expect("valid channel");
        // p10 and p11 must not sort between p1 and p2
        assert_eq!(node_name_to_channel(&name), channel);
    }

    #[test]
    fn foreign_domains_render_as_json() {
        let name = NodeName::new().with_key(Key::new("market", "bananas"));
        assert_eq!(node_name_to_channel(&name), r#"{"market":"bananas"}"#);
    }
}
