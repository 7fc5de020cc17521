// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-client session state.
//!
//! A session buffers the messages produced between two polls of its
//! client and holds at most one parked long-poll at a time. It is the
//! glue between the pub/sub engine and the protocol responders: the
//! session *is* the engine-side [`Subscriber`], and its callbacks render
//! engine events into protocol-shaped JSON messages — Bayeux or native,
//! depending on the flavor it was created with.

use crate::protocol::{
    node_name_to_channel, ERR_INIT_FAILED, ERR_INVALID_NODE, ERR_NOT_AUTHORIZED,
    ERR_NOT_SUBSCRIBED,
};
use beacon_core::{ObjectBuilder, Value};
use beacon_pubsub::{
    Configuration, NodeName, NodeVersion, Root, Subscriber, SubscriberId, VersionedNode,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// The wire dialect a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStyle {
    Bayeux,
    Native,
}

/// What a responder gets back from [`Session::wait_for_events`].
pub enum Wait {
    /// Buffered messages were pending; respond right away.
    Ready(Vec<Value>),
    /// Nothing buffered: the responder is parked until a message arrives
    /// or it gives up via [`Session::abandon_wait`].
    Park { receiver: oneshot::Receiver<Vec<Value>>, generation: u64 },
}

struct SubscriptionEntry {
    /// Bayeux: the client-supplied `id` to echo in the subscription ack.
    reply_id: Option<Value>,
    /// Whether the Bayeux subscription ack has been sent yet.
    acked: bool,
    /// The version last delivered to (or reported by) this client; used
    /// to prefer delta updates over full snapshots.
    last_version: Option<NodeVersion>,
}

struct SessionState {
    messages: VecDeque<Value>,
    buffered_bytes: usize,
    waiter: Option<oneshot::Sender<Vec<Value>>>,
    poll_generation: u64,
    subscriptions: HashMap<NodeName, SubscriptionEntry>,
    closed: bool,
}

/// One client's state: id, message buffer, parked poll and subscriptions.
pub struct Session {
    id: String,
    style: ProtocolStyle,
    root: Arc<Root>,
    subscriber_id: OnceLock<SubscriberId>,
    config: Arc<Configuration>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session and registers it as a subscriber with the root.
    pub fn create(
        id: String,
        style: ProtocolStyle,
        root: Arc<Root>,
        config: Arc<Configuration>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id,
            style,
            root: Arc::clone(&root),
            subscriber_id: OnceLock::new(),
            config,
            state: Mutex::new(SessionState {
                messages: VecDeque::new(),
                buffered_bytes: 0,
                waiter: None,
                poll_generation: 0,
                subscriptions: HashMap::new(),
                closed: false,
            }),
        });

        let subscriber = root.register_subscriber(Arc::clone(&session) as _);
        let _ = session.subscriber_id.set(subscriber);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn style(&self) -> ProtocolStyle {
        self.style
    }

    fn subscriber(&self) -> SubscriberId {
        *self.subscriber_id.get().unwrap_or_else(|| unreachable!("set in create"))
    }

    /// Starts a subscription. The acknowledgement (or the rejection) is
    /// produced asynchronously through the subscriber callbacks.
    ///
    /// `reply_id` is the Bayeux message id to echo; `from_version` is the
    /// native client's last known version, used to resume with a delta.
    pub fn subscribe(
        &self,
        name: NodeName,
        reply_id: Option<Value>,
        from_version: Option<NodeVersion>,
    ) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.subscriptions.insert(
                name.clone(),
                SubscriptionEntry { reply_id, acked: false, last_version: from_version },
            );
        }

        self.root.subscribe(self.subscriber(), &name);
    }

    /// Ends a subscription, appending the protocol ack to the buffer. An
    /// unsubscribe for a node the session never subscribed to appends an
    /// error ack.
    pub fn unsubscribe(&self, name: &NodeName, reply_id: Option<&Value>) {
        let was_subscribed = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.subscriptions.remove(name).is_some()
        };

        if was_subscribed {
            self.root.unsubscribe(self.subscriber(), name);
        }

        let message = match self.style {
            ProtocolStyle::Bayeux => {
                let mut builder = ObjectBuilder::new()
                    .insert("channel", "/meta/unsubscribe")
                    .insert("subscription", node_name_to_channel(name))
                    .insert("clientId", self.id.as_str())
                    .insert("successful", was_subscribed);
                if !was_subscribed {
                    builder = builder.insert("error", ERR_NOT_SUBSCRIBED);
                }
                builder.insert_some("id", reply_id.cloned()).build()
            },
            ProtocolStyle::Native => {
                let mut builder =
                    ObjectBuilder::new().insert("unsubscribe", name.to_value());
                if !was_subscribed {
                    builder = builder.insert("error", ERR_NOT_SUBSCRIBED);
                }
                builder.build()
            },
        };

        self.buffer_message(message);
    }

    /// Drains pending messages, or parks the caller until some arrive.
    ///
    /// At most one poll is parked per session; a second poll releases the
    /// first with the empty array before taking its place.
    pub fn wait_for_events(&self) -> Wait {
        let mut state = self.lock();

        if state.closed || !state.messages.is_empty() {
            return Wait::Ready(drain(&mut state));
        }

        if let Some(previous) = state.waiter.take() {
            debug!(session_id = %self.id, "second connection detected, releasing the first");
            let _ = previous.send(Vec::new());
        }

        let (sender, receiver) = oneshot::channel();
        state.waiter = Some(sender);
        state.poll_generation += 1;
        Wait::Park { receiver, generation: state.poll_generation }
    }

    /// Drains pending messages without ever parking.
    pub fn events(&self) -> Vec<Value> {
        let mut state = self.lock();
        drain(&mut state)
    }

    /// Gives up a parked poll (timeout or transport failure). The
    /// generation guards against releasing a newer poll that took the
    /// slot in the meantime.
    pub fn abandon_wait(&self, generation: u64) {
        let mut state = self.lock();
        if state.poll_generation == generation {
            state.waiter = None;
        }
    }

    /// Closes the session: releases any parked poll with the empty array,
    /// tears down every subscription, and rejects further operations.
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.subscriptions.clear();
            if let Some(waiter) = state.waiter.take() {
                let _ = waiter.send(Vec::new());
            }
        }

        self.root.unsubscribe_all(self.subscriber());
    }

    /// Appends a message, enforces the buffer caps, and wakes a parked
    /// poll.
    fn buffer_message(&self, message: Value) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        state.buffered_bytes += message.serialized_size();
        state.messages.push_back(message);

        // drop from the front until both caps hold again
        while state.messages.len() > self.config.max_messages_per_client()
            || (state.buffered_bytes > self.config.max_messages_size_per_client()
                && !state.messages.is_empty())
        {
            if let Some(dropped) = state.messages.pop_front() {
                state.buffered_bytes -= dropped.serialized_size();
                debug!(session_id = %self.id, "dropping buffered message over cap");
            }
        }

        if let Some(waiter) = state.waiter.take() {
            let pending = drain(&mut state);
            if let Err(returned) = waiter.send(pending) {
                // the poll went away between park and wake; keep the
                // messages for the next one
                for message in returned {
                    state.buffered_bytes += message.serialized_size();
                    state.messages.push_back(message);
                }
            }
        }
    }

    fn build_update(&self, name: &NodeName, node: &VersionedNode) -> Value {
        match self.style {
            ProtocolStyle::Bayeux => ObjectBuilder::new()
                .insert("channel", node_name_to_channel(name))
                .insert("data", node.data().clone())
                .build(),
            ProtocolStyle::Native => {
                let key = name.to_value();
                let version = node.current_version();

                let from = {
                    let state = self.lock();
                    state.subscriptions.get(name).and_then(|entry| entry.last_version)
                };

                let message = match from {
                    Some(from) if from < version => match node.get_update_from(from) {
                        (true, script) => ObjectBuilder::new()
                            .insert("key", key)
                            .insert("update", script)
                            .insert("from", from.to_value())
                            .insert("version", version.to_value())
                            .build(),
                        (false, data) => ObjectBuilder::new()
                            .insert("key", key)
                            .insert("data", data)
                            .insert("version", version.to_value())
                            .build(),
                    },
                    _ => ObjectBuilder::new()
                        .insert("key", key)
                        .insert("data", node.data().clone())
                        .insert("version", version.to_value())
                        .build(),
                };

                let mut state = self.lock();
                if let Some(entry) = state.subscriptions.get_mut(name) {
                    entry.last_version = Some(version);
                }
                message
            },
        }
    }

    /// Takes the Bayeux reply id for a subscription that has not been
    /// acknowledged yet; the first update acknowledges the subscription.
    fn take_pending_ack(&self, name: &NodeName) -> Option<Option<Value>> {
        if self.style != ProtocolStyle::Bayeux {
            return None;
        }
        let mut state = self.lock();
        let entry = state.subscriptions.get_mut(name)?;
        if entry.acked {
            return None;
        }
        entry.acked = true;
        Some(entry.reply_id.take())
    }

    fn subscription_error(&self, name: &NodeName, error: &str) -> Value {
        let reply_id = {
            let mut state = self.lock();
            state.subscriptions.remove(name).and_then(|entry| entry.reply_id)
        };

        match self.style {
            ProtocolStyle::Bayeux => ObjectBuilder::new()
                .insert("channel", "/meta/subscribe")
                .insert("subscription", node_name_to_channel(name))
                .insert("clientId", self.id.as_str())
                .insert("successful", false)
                .insert("error", error)
                .insert_some("id", reply_id)
                .build(),
            ProtocolStyle::Native => ObjectBuilder::new()
                .insert("subscribe", name.to_value())
                .insert("error", error)
                .build(),
        }
    }
}

/// The Bayeux subscription ack: sent once, before the first update.
fn subscribe_ack(session: &Session, name: &NodeName, reply_id: Option<Value>) -> Value {
    ObjectBuilder::new()
        .insert("channel", "/meta/subscribe")
        .insert("subscription", node_name_to_channel(name))
        .insert("clientId", session.id())
        .insert("successful", true)
        .insert_some("id", reply_id)
        .build()
}

fn drain(state: &mut SessionState) -> Vec<Value> {
    state.buffered_bytes = 0;
    state.messages.drain(..).collect()
}

impl Subscriber for Session {
    fn on_update(&self, name: &NodeName, node: &VersionedNode) {
        if let Some(reply_id) = self.take_pending_ack(name) {
            self.buffer_message(subscribe_ack(self, name, reply_id));
        }
        let update = self.build_update(name, node);
        self.buffer_message(update);
    }

    fn on_invalid_node_subscription(&self, name: &NodeName) {
        let message = self.subscription_error(name, ERR_INVALID_NODE);
        self.buffer_message(message);
    }

    fn on_unauthorized_node_subscription(&self, name: &NodeName) {
        let message = self.subscription_error(name, ERR_NOT_AUTHORIZED);
        self.buffer_message(message);
    }

    fn on_failed_node_subscription(&self, name: &NodeName) {
        let message = self.subscription_error(name, ERR_INIT_FAILED);
        self.buffer_message(message);
    }
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
