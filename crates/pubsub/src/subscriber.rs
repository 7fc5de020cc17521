// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Subscriber handles.
//!
//! A subscriber registers once with the [root](crate::Root) and receives
//! an opaque [`SubscriberId`]. The root's registry holds the only strong
//! reference to the subscriber; nodes keep bare ids and resolve them at
//! notification time. A stale id — the subscriber already torn down — is
//! a harmless no-op, and there is no reference cycle between sessions and
//! nodes.

use crate::name::NodeName;
use crate::node::VersionedNode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A sink for the outcomes of one logical observer's subscriptions.
pub trait Subscriber: Send + Sync + 'static {
    /// The node is live and changed (or the subscription just completed);
    /// `node` holds the current value and version.
    fn on_update(&self, name: &NodeName, node: &VersionedNode);

    /// The adapter rejected the node name.
    fn on_invalid_node_subscription(&self, name: &NodeName);

    /// The adapter rejected this subscriber for the node.
    fn on_unauthorized_node_subscription(&self, name: &NodeName);

    /// The adapter failed to produce the node's initial value.
    fn on_failed_node_subscription(&self, name: &NodeName);
}

/// Opaque handle for a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

/// The root's strong `id -> subscriber` registry.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    pub(crate) fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, subscriber);
        id
    }

    pub(crate) fn resolve(&self, id: SubscriberId) -> Option<Arc<dyn Subscriber>> {
        self.lock().get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> Option<Arc<dyn Subscriber>> {
        self.lock().remove(&id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, Arc<dyn Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
