// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Recording subscribers and a scripted adapter for tests.

use crate::adapter::Adapter;
use crate::name::NodeName;
use crate::node::{NodeVersion, VersionedNode};
use crate::subscribed_node::{AuthorizationReply, InitReply, ValidationReply};
use crate::subscriber::{Subscriber, SubscriberId};
use beacon_core::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Everything a subscriber can observe, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    Update { name: NodeName, data: Value, version: NodeVersion },
    Invalid(NodeName),
    Unauthorized(NodeName),
    Failed(NodeName),
}

/// A subscriber that records every callback.
#[derive(Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<SubscriberEvent>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns the recorded events.
    pub fn take_events(&self) -> Vec<SubscriberEvent> {
        std::mem::take(&mut *lock(&self.events))
    }
}

impl Subscriber for RecordingSubscriber {
    fn on_update(&self, name: &NodeName, node: &VersionedNode) {
        lock(&self.events).push(SubscriberEvent::Update {
            name: name.clone(),
            data: node.data().clone(),
            version: node.current_version(),
        });
    }

    fn on_invalid_node_subscription(&self, name: &NodeName) {
        lock(&self.events).push(SubscriberEvent::Invalid(name.clone()));
    }

    fn on_unauthorized_node_subscription(&self, name: &NodeName) {
        lock(&self.events).push(SubscriberEvent::Unauthorized(name.clone()));
    }

    fn on_failed_node_subscription(&self, name: &NodeName) {
        lock(&self.events).push(SubscriberEvent::Failed(name.clone()));
    }
}

/// How the scripted adapter answers one stage for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Affirm,
    Deny,
    /// Hold the reply handle; the test completes (or drops) it later.
    Defer,
}

/// Bookkeeping callbacks received by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterReport {
    InvalidSubscription(NodeName, SubscriberId),
    UnauthorizedSubscription(NodeName, SubscriberId),
    InitializationFailed(NodeName),
}

/// An adapter whose answers are scripted per node name.
///
/// Unconfigured nodes are valid, authorized and initialized to `null`.
#[derive(Default)]
pub struct ScriptedAdapter {
    validation: Mutex<HashMap<NodeName, Answer>>,
    authorization: Mutex<HashMap<NodeName, Answer>>,
    init: Mutex<HashMap<NodeName, Answer>>,
    init_values: Mutex<HashMap<NodeName, Value>>,
    deferred_validations: Mutex<Vec<(NodeName, ValidationReply)>>,
    deferred_authorizations: Mutex<Vec<(NodeName, SubscriberId, AuthorizationReply)>>,
    deferred_inits: Mutex<Vec<(NodeName, InitReply)>>,
    reports: Mutex<Vec<AdapterReport>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_validation(&self, name: &NodeName, answer: Answer) {
        lock(&self.validation).insert(name.clone(), answer);
    }

    pub fn answer_authorization(&self, name: &NodeName, answer: Answer) {
        lock(&self.authorization).insert(name.clone(), answer);
    }

    pub fn answer_init(&self, name: &NodeName, answer: Answer) {
        lock(&self.init).insert(name.clone(), answer);
    }

    /// Sets the value `node_init` affirms with (default `null`).
    pub fn set_initial_value(&self, name: &NodeName, value: Value) {
        lock(&self.init_values).insert(name.clone(), value);
    }

    /// Completes a deferred validation; `true` if one was pending.
    pub fn complete_validation(&self, name: &NodeName, valid: bool) -> bool {
        let Some((_, reply)) = take_deferred(&self.deferred_validations, |(n, _)| n == name)
        else {
            return false;
        };
        if valid {
            reply.is_valid();
        } else {
            reply.not_valid();
        }
        true
    }

    /// Completes a deferred authorization; `true` if one was pending.
    pub fn complete_authorization(&self, name: &NodeName, authorized: bool) -> bool {
        let Some((_, _, reply)) =
            take_deferred(&self.deferred_authorizations, |(n, _, _)| n == name)
        else {
            return false;
        };
        if authorized {
            reply.is_authorized();
        } else {
            reply.not_authorized();
        }
        true
    }

    /// Completes a deferred initialization; `true` if one was pending.
    pub fn complete_init(&self, name: &NodeName, value: Option<Value>) -> bool {
        let Some((_, reply)) = take_deferred(&self.deferred_inits, |(n, _)| n == name) else {
            return false;
        };
        match value {
            Some(value) => reply.initial_value(value),
            None => drop(reply),
        }
        true
    }

    /// Drops every held reply handle, triggering the drop fallbacks.
    pub fn drop_deferred(&self) {
        lock(&self.deferred_validations).clear();
        lock(&self.deferred_authorizations).clear();
        lock(&self.deferred_inits).clear();
    }

    pub fn take_reports(&self) -> Vec<AdapterReport> {
        std::mem::take(&mut *lock(&self.reports))
    }

    fn answer_for(&self, table: &Mutex<HashMap<NodeName, Answer>>, name: &NodeName) -> Answer {
        lock(table).get(name).copied().unwrap_or(Answer::Affirm)
    }
}

impl Adapter for ScriptedAdapter {
    fn validate_node(&self, name: &NodeName, reply: ValidationReply) {
        match self.answer_for(&self.validation, name) {
            Answer::Affirm => reply.is_valid(),
            Answer::Deny => reply.not_valid(),
            Answer::Defer => lock(&self.deferred_validations).push((name.clone(), reply)),
        }
    }

    fn authorize(&self, subscriber: SubscriberId, name: &NodeName, reply: AuthorizationReply) {
        match self.answer_for(&self.authorization, name) {
            Answer::Affirm => reply.is_authorized(),
            Answer::Deny => reply.not_authorized(),
            Answer::Defer => {
                lock(&self.deferred_authorizations).push((name.clone(), subscriber, reply));
            },
        }
    }

    fn node_init(&self, name: &NodeName, reply: InitReply) {
        match self.answer_for(&self.init, name) {
            Answer::Affirm => {
                let value = lock(&self.init_values).get(name).cloned().unwrap_or(Value::Null);
                reply.initial_value(value);
            },
            Answer::Deny => drop(reply),
            Answer::Defer => lock(&self.deferred_inits).push((name.clone(), reply)),
        }
    }

    fn invalid_node_subscription(&self, name: &NodeName, subscriber: SubscriberId) {
        lock(&self.reports).push(AdapterReport::InvalidSubscription(name.clone(), subscriber));
    }

    fn unauthorized_subscription(&self, name: &NodeName, subscriber: SubscriberId) {
        lock(&self.reports)
            .push(AdapterReport::UnauthorizedSubscription(name.clone(), subscriber));
    }

    fn initialization_failed(&self, name: &NodeName) {
        lock(&self.reports).push(AdapterReport::InitializationFailed(name.clone()));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_deferred<T>(store: &Mutex<Vec<T>>, matches: impl Fn(&T) -> bool) -> Option<T> {
    let mut held = lock(store);
    let position = held.iter().position(matches)?;
    Some(held.remove(position))
}
