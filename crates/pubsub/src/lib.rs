// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! # beacon-pubsub
//!
//! The publish/subscribe engine behind the Beacon server: named, versioned
//! data nodes, subscriber management, and the asynchronous
//! validate → authorize → initialize pipeline that gates every
//! subscription through the application's [`Adapter`].
//!
//! The [`Root`] owns the node index. Sessions register as [`Subscriber`]s
//! and receive opaque [`SubscriberId`] handles; the root keeps the only
//! strong reference to each subscriber and tears it down on
//! [`Root::unsubscribe_all`].

pub mod adapter;
pub mod config;
pub mod logging_adapter;
pub mod name;
pub mod node;
pub mod root;
pub mod subscribed_node;
pub mod subscriber;
pub mod test_util;


pub use adapter::Adapter;
pub use config::Configuration;
pub use logging_adapter::LoggingAdapter;
pub use name::{build_node_group, Key, KeyDomain, NameError, NodeGroup, NodeName};
pub use node::{NodeVersion, VersionedNode};
pub use root::{Root, RootError};
pub use subscribed_node::{AuthorizationReply, InitReply, SubscribedNode, ValidationReply};
pub use subscriber::{Subscriber, SubscriberId};
