// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A node together with its subscribers and its validation lifecycle.
//!
//! Every node passes through a state machine: it starts `Unvalidated`,
//! the adapter's answers move it through authorization and initialization
//! into `Live`, or into one of the two terminal failure states. While the
//! pipeline runs, subscribers are staged; they receive their first
//! `on_update` when the node becomes live.
//!
//! The transitions are driven by three one-shot reply handles handed to
//! the adapter. An unanswered handle synthesizes its stage's negative
//! outcome on drop.

use crate::adapter::Adapter;
use crate::config::Configuration;
use crate::name::NodeName;
use crate::node::VersionedNode;
use crate::subscriber::{SubscriberId, SubscriberRegistry};
use beacon_core::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of a subscribed node. Only `Live` carries data.
enum Lifecycle {
    /// The adapter has not yet confirmed that the name denotes a node.
    Unvalidated,
    /// Valid, but no subscriber has been authorized yet.
    Uninitialized,
    /// The adapter is producing the initial value.
    Initializing,
    /// Valid and initialized; updates flow to subscribers.
    Live(VersionedNode),
    /// Terminal: the name does not denote a node.
    Invalid,
    /// Terminal: the adapter failed to produce an initial value.
    InitFailed,
}

struct NodeState {
    lifecycle: Lifecycle,
    /// Subscribers receiving updates (or about to, once live).
    authorized: BTreeSet<SubscriberId>,
    /// Subscribers waiting for an authorization verdict.
    pending: BTreeSet<SubscriberId>,
    /// Wall-clock of the last delivered push, for `min_update_period`.
    last_publish: Option<Instant>,
    flush_scheduled: bool,
}

/// What the root has to do after adding a subscriber.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AddOutcome {
    /// Staged or delivered; nothing further to do.
    Done,
    /// The node is validated and requires authorization: ask the adapter.
    NeedsAuthorization,
    /// The node is already invalid; the subscriber was told synchronously.
    AlreadyInvalid,
    /// Initialization already failed; the subscriber was told.
    AlreadyFailed,
}

/// A node entry of the root's index: versioned data, subscriber sets and
/// the lifecycle state, behind one mutex.
pub struct SubscribedNode {
    state: Mutex<NodeState>,
    config: Arc<Configuration>,
    subscribers: Arc<SubscriberRegistry>,
}

impl SubscribedNode {
    pub(crate) fn new(
        config: Arc<Configuration>,
        subscribers: Arc<SubscriberRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState {
                lifecycle: Lifecycle::Unvalidated,
                authorized: BTreeSet::new(),
                pending: BTreeSet::new(),
                last_publish: None,
                flush_scheduled: false,
            }),
            config,
            subscribers,
        })
    }

    pub(crate) fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Changes the node's data. Before the node is live this is a no-op:
    /// the adapter's initial value is authoritative.
    pub fn change_data(self: &Arc<Self>, name: &NodeName, new_data: &Value) {
        let mut state = self.lock();

        let Lifecycle::Live(node) = &mut state.lifecycle else {
            debug!(node = %name, "dropping update for node that is not live");
            return;
        };

        if !node.update(new_data, self.config.max_update_size()) {
            return;
        }

        let period = self.config.min_update_period();
        if period.is_zero() || tokio::runtime::Handle::try_current().is_err() {
            state.last_publish = Some(Instant::now());
            notify_subscribers(&state, name, &self.subscribers);
            return;
        }

        let now = Instant::now();
        match state.last_publish {
            Some(last) if now.duration_since(last) < period => {
                // inside the quiet period: keep the data, defer the push;
                // later changes coalesce into the scheduled flush
                if !state.flush_scheduled {
                    state.flush_scheduled = true;
                    let node = Arc::clone(self);
                    let name = name.clone();
                    let deadline = last + period;
                    tokio::spawn(async move {
                        tokio::time::sleep_until(deadline).await;
                        node.flush_deferred(&name);
                    });
                }
            },
            _ => {
                state.last_publish = Some(now);
                notify_subscribers(&state, name, &self.subscribers);
            },
        }
    }

    fn flush_deferred(&self, name: &NodeName) {
        let mut state = self.lock();
        state.flush_scheduled = false;
        state.last_publish = Some(Instant::now());
        notify_subscribers(&state, name, &self.subscribers);
    }

    /// Adds a subscriber, staging it if the pipeline is still running.
    pub(crate) fn add_subscriber(&self, id: SubscriberId, name: &NodeName) -> AddOutcome {
        let mut state = self.lock();

        if matches!(state.lifecycle, Lifecycle::Invalid) {
            if let Some(subscriber) = self.subscribers.resolve(id) {
                subscriber.on_invalid_node_subscription(name);
            }
            return AddOutcome::AlreadyInvalid;
        }
        if matches!(state.lifecycle, Lifecycle::InitFailed) {
            if let Some(subscriber) = self.subscribers.resolve(id) {
                subscriber.on_failed_node_subscription(name);
            }
            return AddOutcome::AlreadyFailed;
        }

        if self.config.authorization_required() {
            state.pending.insert(id);
            return if matches!(state.lifecycle, Lifecycle::Unvalidated) {
                // the validator fires the authorizers once validated
                AddOutcome::Done
            } else {
                AddOutcome::NeedsAuthorization
            };
        }

        state.authorized.insert(id);
        if let Lifecycle::Live(node) = &state.lifecycle {
            if let Some(subscriber) = self.subscribers.resolve(id) {
                subscriber.on_update(name, node);
            }
        }
        AddOutcome::Done
    }

    /// Removes the subscriber from both sets; `true` if it was present.
    pub(crate) fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let mut state = self.lock();
        let in_authorized = state.authorized.remove(&id);
        let in_pending = state.pending.remove(&id);
        in_authorized || in_pending
    }

    /// A node with no subscribers at all is a candidate for cleanup.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.lock();
        state.authorized.is_empty() && state.pending.is_empty()
    }

    fn validated(&self, ctx: &StageCtx) {
        enum After {
            Authorize(Vec<SubscriberId>),
            Init,
            Nothing,
        }

        let after = {
            let mut state = self.lock();
            match state.lifecycle {
                Lifecycle::Unvalidated => {
                    if self.config.authorization_required() {
                        state.lifecycle = Lifecycle::Uninitialized;
                        After::Authorize(state.pending.iter().copied().collect())
                    } else {
                        state.lifecycle = Lifecycle::Initializing;
                        After::Init
                    }
                },
                _ => {
                    warn!(node = %ctx.name, "late validation result ignored");
                    After::Nothing
                },
            }
        };

        match after {
            After::Authorize(pending) => {
                for subscriber in pending {
                    ctx.adapter.authorize(
                        subscriber,
                        &ctx.name,
                        AuthorizationReply::new(ctx.clone(), subscriber),
                    );
                }
            },
            After::Init => ctx.adapter.node_init(&ctx.name, InitReply::new(ctx.clone())),
            After::Nothing => {},
        }
    }

    fn not_validated(&self, name: &NodeName) {
        let mut state = self.lock();

        let all: Vec<SubscriberId> =
            state.authorized.iter().chain(state.pending.iter()).copied().collect();
        state.authorized.clear();
        state.pending.clear();
        state.lifecycle = Lifecycle::Invalid;

        for id in all {
            if let Some(subscriber) = self.subscribers.resolve(id) {
                subscriber.on_invalid_node_subscription(name);
            }
        }
    }

    fn authorized_subscriber(&self, ctx: &StageCtx, id: SubscriberId) {
        let start_init = {
            let mut state = self.lock();

            if !state.pending.remove(&id) {
                return;
            }
            state.authorized.insert(id);

            match &state.lifecycle {
                Lifecycle::Uninitialized => {
                    state.lifecycle = Lifecycle::Initializing;
                    true
                },
                Lifecycle::Live(node) => {
                    if let Some(subscriber) = self.subscribers.resolve(id) {
                        subscriber.on_update(&ctx.name, node);
                    }
                    false
                },
                _ => false,
            }
        };

        if start_init {
            ctx.adapter.node_init(&ctx.name, InitReply::new(ctx.clone()));
        }
    }

    fn unauthorized_subscriber(&self, id: SubscriberId) {
        let mut state = self.lock();
        state.pending.remove(&id);
    }

    fn initial_data(&self, name: &NodeName, new_data: Value) {
        let mut state = self.lock();

        if !matches!(state.lifecycle, Lifecycle::Initializing) {
            warn!(node = %name, "late initial value ignored");
            return;
        }

        state.lifecycle = Lifecycle::Live(VersionedNode::new(new_data));
        state.last_publish = Some(Instant::now());
        notify_subscribers(&state, name, &self.subscribers);
    }

    fn initial_data_failed(&self, name: &NodeName) {
        let mut state = self.lock();

        if !matches!(state.lifecycle, Lifecycle::Initializing) {
            return;
        }

        let all: Vec<SubscriberId> =
            state.authorized.iter().chain(state.pending.iter()).copied().collect();
        state.authorized.clear();
        state.pending.clear();
        state.lifecycle = Lifecycle::InitFailed;

        for id in all {
            if let Some(subscriber) = self.subscribers.resolve(id) {
                subscriber.on_failed_node_subscription(name);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delivery happens under the node mutex, which is what orders updates
/// per subscriber; subscriber callbacks must not call back into this
/// node.
fn notify_subscribers(state: &NodeState, name: &NodeName, registry: &SubscriberRegistry) {
    let Lifecycle::Live(node) = &state.lifecycle else {
        return;
    };

    for id in &state.authorized {
        if let Some(subscriber) = registry.resolve(*id) {
            subscriber.on_update(name, node);
        }
    }
}

/// Everything a pipeline stage needs to drive its node and start the
/// next stage.
#[derive(Clone)]
pub(crate) struct StageCtx {
    pub(crate) node: Arc<SubscribedNode>,
    pub(crate) name: NodeName,
    pub(crate) adapter: Arc<dyn Adapter>,
}

/// One-shot answer to [`Adapter::validate_node`].
///
/// Dropping the handle unanswered counts as `not_valid`.
pub struct ValidationReply {
    inner: Option<(StageCtx, SubscriberId)>,
}

impl ValidationReply {
    pub(crate) fn new(ctx: StageCtx, subscriber: SubscriberId) -> Self {
        Self { inner: Some((ctx, subscriber)) }
    }

    /// The name denotes a node; authorization or initialization follows.
    pub fn is_valid(mut self) {
        if let Some((ctx, _)) = self.inner.take() {
            ctx.node.validated(&ctx);
        }
    }

    /// The name does not denote a node. Every staged subscriber is told,
    /// the node becomes terminally invalid.
    pub fn not_valid(mut self) {
        if let Some(inner) = self.inner.take() {
            Self::reject(inner);
        }
    }

    fn reject((ctx, subscriber): (StageCtx, SubscriberId)) {
        ctx.node.not_validated(&ctx.name);
        ctx.adapter.invalid_node_subscription(&ctx.name, subscriber);
    }
}

impl Drop for ValidationReply {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            Self::reject(inner);
        }
    }
}

/// One-shot answer to [`Adapter::authorize`] for one subscriber.
///
/// Dropping the handle unanswered counts as `not_authorized`.
pub struct AuthorizationReply {
    inner: Option<(StageCtx, SubscriberId)>,
}

impl AuthorizationReply {
    pub(crate) fn new(ctx: StageCtx, subscriber: SubscriberId) -> Self {
        Self { inner: Some((ctx, subscriber)) }
    }

    pub fn is_authorized(mut self) {
        if let Some((ctx, subscriber)) = self.inner.take() {
            ctx.node.authorized_subscriber(&ctx, subscriber);
        }
    }

    pub fn not_authorized(mut self) {
        if let Some(inner) = self.inner.take() {
            Self::reject(inner);
        }
    }

    fn reject((ctx, subscriber): (StageCtx, SubscriberId)) {
        ctx.node.unauthorized_subscriber(subscriber);
        if let Some(user) = ctx.node.subscribers.resolve(subscriber) {
            user.on_unauthorized_node_subscription(&ctx.name);
        }
        ctx.adapter.unauthorized_subscription(&ctx.name, subscriber);
    }
}

impl Drop for AuthorizationReply {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            Self::reject(inner);
        }
    }
}

/// One-shot answer to [`Adapter::node_init`].
///
/// Dropping the handle unanswered counts as initialization failure.
pub struct InitReply {
    inner: Option<StageCtx>,
}

impl InitReply {
    pub(crate) fn new(ctx: StageCtx) -> Self {
        Self { inner: Some(ctx) }
    }

    /// Seeds the node and makes it live; staged subscribers receive the
    /// value immediately.
    pub fn initial_value(mut self, value: Value) {
        if let Some(ctx) = self.inner.take() {
            ctx.node.initial_data(&ctx.name, value);
        }
    }

    fn reject(ctx: StageCtx) {
        ctx.node.initial_data_failed(&ctx.name);
        ctx.adapter.initialization_failed(&ctx.name);
    }
}

impl Drop for InitReply {
    fn drop(&mut self) {
        if let Some(ctx) = self.inner.take() {
            Self::reject(ctx);
        }
    }
}

/// Builds the validator for a freshly created node. The caller fires it
/// through the adapter after releasing its locks.
pub(crate) fn create_validator(
    node: Arc<SubscribedNode>,
    name: NodeName,
    adapter: Arc<dyn Adapter>,
    subscriber: SubscriberId,
) -> ValidationReply {
    ValidationReply::new(StageCtx { node, name, adapter }, subscriber)
}

/// Builds an authorizer for a subscriber joining an already validated
/// node.
pub(crate) fn create_authorizer(
    node: Arc<SubscribedNode>,
    name: NodeName,
    adapter: Arc<dyn Adapter>,
    subscriber: SubscriberId,
) -> AuthorizationReply {
    AuthorizationReply::new(StageCtx { node, name, adapter }, subscriber)
}
