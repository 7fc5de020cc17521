// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The pub/sub root: node index, configuration registry and the entry
//! points `subscribe`, `unsubscribe` and `update_node`.

use crate::adapter::Adapter;
use crate::config::Configuration;
use crate::name::{NodeGroup, NodeName};
use crate::subscribed_node::{
    create_authorizer, create_validator, AddOutcome, SubscribedNode, ValidationReply,
};
use crate::subscriber::{Subscriber, SubscriberId, SubscriberRegistry};
use beacon_core::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RootError {
    #[error("no such configuration: {0}")]
    NoSuchConfiguration(String),
}

/// First-match-wins list of `(group, configuration)` pairs with a default
/// at the end.
struct ConfigurationList {
    configurations: Vec<(NodeGroup, Arc<Configuration>)>,
    default: Arc<Configuration>,
}

impl ConfigurationList {
    fn new(default_configuration: Configuration) -> Self {
        Self { configurations: Vec::new(), default: Arc::new(default_configuration) }
    }

    fn add(&mut self, group: NodeGroup, config: Configuration) {
        self.configurations.push((group, Arc::new(config)));
    }

    fn remove(&mut self, group: &NodeGroup) -> Result<(), RootError> {
        let position = self
            .configurations
            .iter()
            .position(|(g, _)| g == group)
            .ok_or_else(|| RootError::NoSuchConfiguration(group.to_string()))?;
        self.configurations.remove(position);
        Ok(())
    }

    fn get(&self, name: &NodeName) -> Arc<Configuration> {
        self.configurations
            .iter()
            .find(|(group, _)| group.in_group(name))
            .map_or_else(|| Arc::clone(&self.default), |(_, config)| Arc::clone(config))
    }
}

struct RootIndex {
    configurations: ConfigurationList,
    nodes: HashMap<NodeName, Arc<SubscribedNode>>,
}

/// The authoritative registry of data nodes.
///
/// Thread-safe; the index lock is never held across adapter callbacks,
/// so adapters may re-enter `subscribe` freely.
pub struct Root {
    index: Mutex<RootIndex>,
    subscribers: Arc<SubscriberRegistry>,
    adapter: Arc<dyn Adapter>,
}

impl Root {
    pub fn new(adapter: Arc<dyn Adapter>, default_configuration: Configuration) -> Arc<Self> {
        Arc::new(Self {
            index: Mutex::new(RootIndex {
                configurations: ConfigurationList::new(default_configuration),
                nodes: HashMap::new(),
            }),
            subscribers: Arc::new(SubscriberRegistry::default()),
            adapter,
        })
    }

    /// Registers a subscriber and returns its opaque handle. The root
    /// holds the only strong reference; [`Self::unsubscribe_all`] drops
    /// it again.
    pub fn register_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        self.subscribers.register(subscriber)
    }

    /// Adds a configuration consulted for nodes created after this call;
    /// existing nodes keep the configuration they were created with.
    pub fn add_configuration(&self, group: NodeGroup, config: Configuration) {
        self.lock().configurations.add(group, config);
    }

    /// # Errors
    ///
    /// Fails when no configuration was added for exactly this group.
    pub fn remove_configuration(&self, group: &NodeGroup) -> Result<(), RootError> {
        self.lock().configurations.remove(group)
    }

    /// Subscribes `subscriber` to `name`, creating the node and starting
    /// its validation pipeline when this is the first subscription.
    pub fn subscribe(&self, subscriber: SubscriberId, name: &NodeName) {
        let (node, validator) = {
            let mut index = self.lock();

            match index.nodes.get(name) {
                Some(node) => (Arc::clone(node), None),
                None => {
                    let config = index.configurations.get(name);
                    let node = SubscribedNode::new(config, Arc::clone(&self.subscribers));
                    index.nodes.insert(name.clone(), Arc::clone(&node));

                    let validator = create_validator(
                        Arc::clone(&node),
                        name.clone(),
                        Arc::clone(&self.adapter),
                        subscriber,
                    );
                    (node, Some(validator))
                },
            }
        };

        self.run_subscription(node, validator, subscriber, name);
    }

    fn run_subscription(
        &self,
        node: Arc<SubscribedNode>,
        validator: Option<ValidationReply>,
        subscriber: SubscriberId,
        name: &NodeName,
    ) {
        match node.add_subscriber(subscriber, name) {
            AddOutcome::NeedsAuthorization => {
                // the node is past validation; this subscriber gets its
                // own authorization round
                let reply = create_authorizer(
                    node,
                    name.clone(),
                    Arc::clone(&self.adapter),
                    subscriber,
                );
                self.adapter.authorize(subscriber, name, reply);
            },
            AddOutcome::AlreadyInvalid => {
                self.adapter.invalid_node_subscription(name, subscriber);
            },
            AddOutcome::Done | AddOutcome::AlreadyFailed => {},
        }

        if let Some(validator) = validator {
            self.adapter.validate_node(name, validator);
        }
    }

    /// Removes the subscription; `true` when it existed. A node left
    /// without subscribers is garbage-collected after its configured
    /// `node_timeout` of continuous emptiness.
    pub fn unsubscribe(self: &Arc<Self>, subscriber: SubscriberId, name: &NodeName) -> bool {
        let node = {
            let index = self.lock();
            index.nodes.get(name).cloned()
        };

        let Some(node) = node else {
            return false;
        };

        let removed = node.remove_subscriber(subscriber);
        if node.is_idle() {
            self.schedule_cleanup(name.clone(), node.configuration().node_timeout());
        }
        removed
    }

    /// Tears a subscriber down: removes it from every node and drops the
    /// strong reference. Used when a session ends.
    pub fn unsubscribe_all(self: &Arc<Self>, subscriber: SubscriberId) {
        let nodes: Vec<(NodeName, Arc<SubscribedNode>)> = {
            let index = self.lock();
            index.nodes.iter().map(|(n, node)| (n.clone(), Arc::clone(node))).collect()
        };

        for (name, node) in nodes {
            if node.remove_subscriber(subscriber) && node.is_idle() {
                self.schedule_cleanup(name, node.configuration().node_timeout());
            }
        }

        self.subscribers.remove(subscriber);
    }

    /// Pushes a new value into a node. Authorization is not checked here;
    /// gating writes is the application's responsibility.
    pub fn update_node(&self, name: &NodeName, new_data: &Value) {
        let node = {
            let index = self.lock();
            index.nodes.get(name).cloned()
        };

        if let Some(node) = node {
            node.change_data(name, new_data);
        }
    }

    /// Number of nodes in the index, including ones still validating.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    fn schedule_cleanup(self: &Arc<Self>, name: NodeName, after: std::time::Duration) {
        // without a runtime (plain unit tests) empty nodes are simply kept
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let root = Arc::clone(self);
        handle.spawn(async move {
            tokio::time::sleep(after).await;
            root.collect_if_still_idle(&name);
        });
    }

    /// The timer's callback re-checks under the lock: a subscription that
    /// arrived while the timer was armed keeps the node alive.
    fn collect_if_still_idle(&self, name: &NodeName) {
        let mut index = self.lock();
        if index.nodes.get(name).is_some_and(|node| node.is_idle()) {
            index.nodes.remove(name);
            debug!(node = %name, "removed idle node");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RootIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
