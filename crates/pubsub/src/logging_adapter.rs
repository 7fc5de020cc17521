// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! An [`Adapter`] decorator that logs every request crossing the
//! application boundary before forwarding it.
//!
//! Negative outcomes come back through the bookkeeping hooks and are
//! logged there; positive outcomes show up as node transitions and are
//! logged by the engine itself.

use crate::adapter::Adapter;
use crate::name::NodeName;
use crate::subscribed_node::{AuthorizationReply, InitReply, ValidationReply};
use crate::subscriber::SubscriberId;
use tracing::info;

/// Wraps another adapter and logs all traffic to it.
pub struct LoggingAdapter<A> {
    inner: A,
}

impl<A: Adapter> LoggingAdapter<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Adapter> Adapter for LoggingAdapter<A> {
    fn validate_node(&self, name: &NodeName, reply: ValidationReply) {
        info!(call = "validate_node", node = %name);
        self.inner.validate_node(name, reply);
    }

    fn authorize(&self, subscriber: SubscriberId, name: &NodeName, reply: AuthorizationReply) {
        info!(call = "authorize", node = %name, ?subscriber);
        self.inner.authorize(subscriber, name, reply);
    }

    fn node_init(&self, name: &NodeName, reply: InitReply) {
        info!(call = "node_init", node = %name);
        self.inner.node_init(name, reply);
    }

    fn invalid_node_subscription(&self, name: &NodeName, subscriber: SubscriberId) {
        info!(result = "invalid_node_subscription", node = %name, ?subscriber);
        self.inner.invalid_node_subscription(name, subscriber);
    }

    fn unauthorized_subscription(&self, name: &NodeName, subscriber: SubscriberId) {
        info!(result = "unauthorized_subscription", node = %name, ?subscriber);
        self.inner.unauthorized_subscription(name, subscriber);
    }

    fn initialization_failed(&self, name: &NodeName) {
        info!(result = "initialization_failed", node = %name);
        self.inner.initialization_failed(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::root::Root;
    use crate::test_util::{
        Answer, RecordingSubscriber, ScriptedAdapter, SubscriberEvent,
    };
    use beacon_core::Value;
    use std::sync::Arc;

    fn name(text: &str) -> NodeName {
        NodeName::from_value(&Value::from_json(text).expect("valid json"))
            .expect("valid name")
    }

    #[test]
    fn requests_and_outcomes_pass_through() {
        let scripted = Arc::new(ScriptedAdapter::new());
        let node = name(r#"{"a":"1"}"#);
        scripted.set_initial_value(&node, Value::Int(5));

        let root = Root::new(
            Arc::new(LoggingAdapter::new(Arc::clone(&scripted))),
            Configuration::new().with_authorization_required(false),
        );

        let subscriber = Arc::new(RecordingSubscriber::new());
        let id = root.register_subscriber(Arc::clone(&subscriber) as _);
        root.subscribe(id, &node);

        assert_eq!(
            subscriber.take_events(),
            vec![SubscriberEvent::Update {
                name: node.clone(),
                data: Value::Int(5),
                version: crate::node::NodeVersion::initial(),
            }]
        );

        // rejections travel through the decorator as well
        let rejected = name(r#"{"b":"2"}"#);
        scripted.answer_validation(&rejected, Answer::Deny);
        root.subscribe(id, &rejected);
        assert_eq!(subscriber.take_events(), vec![SubscriberEvent::Invalid(rejected)]);
    }
}
