// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The application-side hook deciding what nodes exist, who may observe
//! them, and what they initially contain.
//!
//! Each of the three stages receives a one-shot reply handle. The adapter
//! may answer inline or hand the handle to another task and answer later;
//! the engine never blocks on it. Dropping a handle unanswered synthesizes
//! the negative outcome for its stage, so a forgotten answer becomes a
//! deterministic failure instead of a subscriber waiting forever.

use crate::name::NodeName;
use crate::subscribed_node::{AuthorizationReply, InitReply, ValidationReply};
use crate::subscriber::SubscriberId;

/// Application interface of the pub/sub engine.
///
/// All callbacks are invoked without any engine lock held; re-entering the
/// root (for example subscribing from inside `node_init`) is allowed.
pub trait Adapter: Send + Sync + 'static {
    /// Does `name` denote a node at all?
    fn validate_node(&self, name: &NodeName, reply: ValidationReply);

    /// May `subscriber` observe `name`? Only called when the node's
    /// configuration requires authorization.
    fn authorize(&self, subscriber: SubscriberId, name: &NodeName, reply: AuthorizationReply);

    /// Produce the initial value of `name`.
    fn node_init(&self, name: &NodeName, reply: InitReply);

    /// Bookkeeping: a subscription to an invalid node was attempted.
    fn invalid_node_subscription(&self, _name: &NodeName, _subscriber: SubscriberId) {}

    /// Bookkeeping: a subscriber was turned away by authorization.
    fn unauthorized_subscription(&self, _name: &NodeName, _subscriber: SubscriberId) {}

    /// Bookkeeping: a node could not be initialized.
    fn initialization_failed(&self, _name: &NodeName) {}
}

impl<A: Adapter + ?Sized> Adapter for std::sync::Arc<A> {
    fn validate_node(&self, name: &NodeName, reply: ValidationReply) {
        (**self).validate_node(name, reply);
    }

    fn authorize(&self, subscriber: SubscriberId, name: &NodeName, reply: AuthorizationReply) {
        (**self).authorize(subscriber, name, reply);
    }

    fn node_init(&self, name: &NodeName, reply: InitReply) {
        (**self).node_init(name, reply);
    }

    fn invalid_node_subscription(&self, name: &NodeName, subscriber: SubscriberId) {
        (**self).invalid_node_subscription(name, subscriber);
    }

    fn unauthorized_subscription(&self, name: &NodeName, subscriber: SubscriberId) {
        (**self).unauthorized_subscription(name, subscriber);
    }

    fn initialization_failed(&self, name: &NodeName) {
        (**self).initialization_failed(name);
    }
}
