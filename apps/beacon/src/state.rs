// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use beacon_pubsub::Root;

use crate::config::Config;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub root: Arc<Root>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}
