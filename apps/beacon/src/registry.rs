// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The session registry: id generation, lookup, idle timeout.
//!
//! A session is "in use" while at least one HTTP exchange holds it; the
//! use count drops to zero between polls, which arms the idle timer. The
//! timer's callback re-checks the count under the lock, so a poll that
//! arrived while the timer was firing keeps the session alive.

use crate::session::{ProtocolStyle, Session};
use beacon_pubsub::{Configuration, Root};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Produces a fresh session id per call.
///
/// `endpoint` is a textual form of the client's network end point; a
/// generator may fold it into the id.
pub trait SessionGenerator: Send + Sync + 'static {
    fn generate(&self, endpoint: &str) -> String;
}

/// The production generator: 64 random bits, hex-encoded.
#[derive(Debug, Default)]
pub struct SecureSessionGenerator;

impl SessionGenerator for SecureSessionGenerator {
    fn generate(&self, _endpoint: &str) -> String {
        let bytes = *Uuid::new_v4().as_bytes();
        let word = u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        format!("{word:x}")
    }
}

/// Deterministic generator for tests: `endpoint/0`, `endpoint/1`, ...
#[derive(Debug, Default)]
pub struct CountingSessionGenerator {
    counter: AtomicU64,
}

impl SessionGenerator for CountingSessionGenerator {
    fn generate(&self, endpoint: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{endpoint}/{n}")
    }
}

struct Entry {
    session: Arc<Session>,
    use_count: u32,
    /// Bumped on every find; a timer armed for an older generation does
    /// nothing when it fires.
    timer_generation: u64,
}

struct RegistryState {
    sessions: HashMap<String, Entry>,
    draining: bool,
}

/// Owns every live session of one server instance.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    generator: Box<dyn SessionGenerator>,
    root: Arc<Root>,
    config: Arc<Configuration>,
}

impl SessionRegistry {
    pub fn new(
        root: Arc<Root>,
        config: Arc<Configuration>,
        generator: Box<dyn SessionGenerator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState { sessions: HashMap::new(), draining: false }),
            generator,
            root,
            config,
        })
    }

    /// Looks up an existing session and marks it in use. Used by Bayeux,
    /// where an unknown `clientId` is a protocol error, not a reason to
    /// create a session.
    pub fn find(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut state = self.lock();
        let entry = state.sessions.get_mut(session_id)?;
        entry.use_count += 1;
        entry.timer_generation += 1;
        Some(Arc::clone(&entry.session))
    }

    /// Returns the session for `session_id`, creating a fresh one when
    /// the id is empty, unknown, or its session is already held by
    /// another exchange. The flag reports whether a session was created.
    pub fn find_or_create(
        &self,
        session_id: Option<&str>,
        endpoint: &str,
        style: ProtocolStyle,
    ) -> (Arc<Session>, bool) {
        let mut state = self.lock();

        if let Some(id) = session_id.filter(|id| !id.is_empty()) {
            if let Some(entry) = state.sessions.get_mut(id) {
                if entry.use_count == 0 {
                    entry.use_count = 1;
                    entry.timer_generation += 1;
                    return (Arc::clone(&entry.session), false);
                }
                // at most one concurrent poll per session: a second
                // exchange gets a session of its own
                debug!(session_id = %id, "session already in use, creating a new one");
            }
        }

        let session = self.create_session(&mut state, endpoint, style);
        (session, true)
    }

    /// Creates a session without looking anything up (Bayeux handshake).
    pub fn create(&self, endpoint: &str, style: ProtocolStyle) -> Arc<Session> {
        let mut state = self.lock();
        self.create_session(&mut state, endpoint, style)
    }

    fn create_session(
        &self,
        state: &mut RegistryState,
        endpoint: &str,
        style: ProtocolStyle,
    ) -> Arc<Session> {
        let mut id = self.generator.generate(endpoint);
        while state.sessions.contains_key(&id) {
            id = self.generator.generate(endpoint);
        }

        let session = Session::create(
            id.clone(),
            style,
            Arc::clone(&self.root),
            Arc::clone(&self.config),
        );

        if state.draining {
            // a draining server still answers, but the session is dead on
            // arrival and holds no subscriptions
            session.shut_down();
        }

        state.sessions.insert(
            id.clone(),
            Entry { session: Arc::clone(&session), use_count: 1, timer_generation: 0 },
        );

        info!(session_id = %id, "created session");
        session
    }

    /// Releases one use of the session; the last release arms the idle
    /// timer.
    pub fn idle(self: &Arc<Self>, session: &Arc<Session>) {
        let mut state = self.lock();
        let draining = state.draining;
        let Some(entry) = state.sessions.get_mut(session.id()) else {
            return;
        };

        entry.use_count = entry.use_count.saturating_sub(1);
        if entry.use_count > 0 || draining {
            return;
        }

        entry.timer_generation += 1;
        let generation = entry.timer_generation;
        drop(state);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = Arc::clone(self);
        let session_id = session.id().to_owned();
        let timeout = self.config.session_timeout();
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.timeout_session(&session_id, generation);
        });
    }

    fn timeout_session(&self, session_id: &str, generation: u64) {
        let session = {
            let mut state = self.lock();
            let Some(entry) = state.sessions.get(session_id) else {
                return;
            };
            // the session was found again while the timer fired
            if entry.use_count > 0 || entry.timer_generation != generation {
                return;
            }
            state.sessions.remove(session_id).map(|entry| entry.session)
        };

        if let Some(session) = session {
            info!(session_id = %session_id, "session timed out");
            session.shut_down();
        }
    }

    /// Drops a session (Bayeux disconnect). The caller shuts the session
    /// itself down; exchanges still holding it release into a no-op.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut state = self.lock();
        state.sessions.remove(session_id).map(|entry| entry.session)
    }

    /// Stops creating useful sessions and closes every existing one.
    pub fn shut_down(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.lock();
            state.draining = true;
            state.sessions.drain().map(|(_, entry)| entry.session).collect()
        };

        for session in sessions {
            session.shut_down();
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_pubsub::test_util::ScriptedAdapter;
    use std::time::Duration;

    fn registry_with_timeout(timeout: Duration) -> Arc<SessionRegistry> {
        let config = Configuration::new()
            .with_authorization_required(false)
            .with_session_timeout(timeout);
        let root = Root::new(Arc::new(ScriptedAdapter::new()), config.clone());
        SessionRegistry::new(root, Arc::new(config), Box::new(CountingSessionGenerator::default()))
    }

    fn registry() -> Arc<SessionRegistry> {
        registry_with_timeout(Duration::from_secs(30))
    }

    #[test]
    fn counting_generator_appends_a_sequence_number() {
        let generator = CountingSessionGenerator::default();
        assert_eq!(generator.generate("192.168.210.1:9999"), "192.168.210.1:9999/0");
        assert_eq!(generator.generate("192.168.210.1:9999"), "192.168.210.1:9999/1");
    }

    #[test]
    fn secure_generator_produces_distinct_hex_ids() {
        let generator = SecureSessionGenerator;
        let a = generator.generate("x");
        let b = generator.generate("x");
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(a.len() <= 16);
    }

    #[test]
    fn empty_or_unknown_ids_create_sessions() {
        let registry = registry();

        let (a, created_a) =
            registry.find_or_create(None, "client:1", ProtocolStyle::Native);
        assert!(created_a);
        assert_eq!(a.id(), "client:1/0");

        let (b, created_b) =
            registry.find_or_create(Some("nope"), "client:1", ProtocolStyle::Native);
        assert!(created_b);
        assert_eq!(b.id(), "client:1/1");
    }

    #[test]
    fn a_released_session_is_found_again() {
        let registry = registry();
        let (session, _) = registry.find_or_create(None, "client:1", ProtocolStyle::Native);
        registry.idle(&session);

        let (found, created) =
            registry.find_or_create(Some(session.id()), "client:1", ProtocolStyle::Native);
        assert!(!created);
        assert_eq!(found.id(), session.id());
    }

    #[test]
    fn a_busy_session_is_not_shared() {
        let registry = registry();
        let (session, _) = registry.find_or_create(None, "client:1", ProtocolStyle::Native);

        // still in use: the second exchange gets its own session
        let (other, created) =
            registry.find_or_create(Some(session.id()), "client:1", ProtocolStyle::Native);
        assert!(created);
        assert_ne!(other.id(), session.id());
    }

    #[test]
    fn bayeux_find_does_not_create() {
        let registry = registry();
        assert!(registry.find("unknown").is_none());

        let session = registry.create("client:1", ProtocolStyle::Bayeux);
        assert!(registry.find(session.id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_time_out() {
        let registry = registry_with_timeout(Duration::from_secs(5));
        let (session, _) = registry.find_or_create(None, "client:1", ProtocolStyle::Native);
        registry.idle(&session);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(registry.session_count(), 0);

        let (_, created) =
            registry.find_or_create(Some(session.id()), "client:1", ProtocolStyle::Native);
        assert!(created);
    }

    #[tokio::test(start_paused = true)]
    async fn a_poll_in_time_keeps_the_session() {
        let registry = registry_with_timeout(Duration::from_secs(5));
        let (session, _) = registry.find_or_create(None, "client:1", ProtocolStyle::Native);
        registry.idle(&session);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let (found, created) =
            registry.find_or_create(Some(session.id()), "client:1", ProtocolStyle::Native);
        assert!(!created);
        registry.idle(&found);

        // the original timer fires into the new generation and must not
        // destroy the session
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn shut_down_closes_all_sessions() {
        let registry = registry();
        let (session, _) = registry.find_or_create(None, "client:1", ProtocolStyle::Native);

        registry.shut_down();
        assert_eq!(registry.session_count(), 0);

        // new sessions are created closed while draining
        let (dead, created) = registry.find_or_create(None, "client:1", ProtocolStyle::Native);
        assert!(created);
        assert_eq!(dead.events(), vec![]);
        drop(session);
    }
}
