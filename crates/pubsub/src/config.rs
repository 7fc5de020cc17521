// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-node-group tuning knobs.

use std::time::Duration;

/// Update policy and resource limits for the nodes of one group.
///
/// The root keeps an ordered list of `(group, configuration)` pairs; a
/// node is configured by the first group it falls into, or by the default
/// configuration. A node keeps the configuration it was created with even
/// if the list changes later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    /// How long a node without subscribers stays in the data model.
    node_timeout: Duration,
    /// Minimum wall-clock spacing between successive pushes of the same
    /// node; changes inside the window coalesce into one deferred push.
    min_update_period: Duration,
    /// Byte budget for delta scripts; above this the full value is sent.
    max_update_size: usize,
    /// Whether `authorize` gates every subscription to these nodes.
    authorization_required: bool,
    /// Count cap of a session's message buffer.
    max_messages_per_client: usize,
    /// Byte cap of a session's message buffer.
    max_messages_size_per_client: usize,
    /// Idle time after which a session is destroyed.
    session_timeout: Duration,
    /// Longest time a poll is held open waiting for events.
    long_polling_timeout: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(30),
            min_update_period: Duration::ZERO,
            max_update_size: 1024,
            authorization_required: true,
            max_messages_per_client: 20,
            max_messages_size_per_client: 4096,
            session_timeout: Duration::from_secs(30),
            long_polling_timeout: Duration::from_secs(20),
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    pub const fn min_update_period(&self) -> Duration {
        self.min_update_period
    }

    pub const fn max_update_size(&self) -> usize {
        self.max_update_size
    }

    pub const fn authorization_required(&self) -> bool {
        self.authorization_required
    }

    pub const fn max_messages_per_client(&self) -> usize {
        self.max_messages_per_client
    }

    pub const fn max_messages_size_per_client(&self) -> usize {
        self.max_messages_size_per_client
    }

    pub const fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub const fn long_polling_timeout(&self) -> Duration {
        self.long_polling_timeout
    }

    #[must_use]
    pub const fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_min_update_period(mut self, period: Duration) -> Self {
        self.min_update_period = period;
        self
    }

    #[must_use]
    pub const fn with_max_update_size(mut self, bytes: usize) -> Self {
        self.max_update_size = bytes;
        self
    }

    #[must_use]
    pub const fn with_authorization_required(mut self, required: bool) -> Self {
        self.authorization_required = required;
        self
    }

    #[must_use]
    pub const fn with_max_messages_per_client(mut self, count: usize) -> Self {
        self.max_messages_per_client = count;
        self
    }

    #[must_use]
    pub const fn with_max_messages_size_per_client(mut self, bytes: usize) -> Self {
        self.max_messages_size_per_client = bytes;
        self
    }

    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_long_polling_timeout(mut self, timeout: Duration) -> Self {
        self.long_polling_timeout = timeout;
        self
    }
}
