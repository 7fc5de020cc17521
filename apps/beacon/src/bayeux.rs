// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The Bayeux responder: one instance per HTTP exchange.
//!
//! The request body is one message object or an array of them. Meta
//! channels drive the session (`handshake`, `connect`, `subscribe`,
//! `unsubscribe`, `disconnect`); anything else is a publication. The
//! exchange long-polls exactly when its last message is a
//! `/meta/connect`.

use crate::protocol::channel_to_node_name;
use crate::session::{ProtocolStyle, Session, Wait};
use crate::state::AppState;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use beacon_core::{ObjectBuilder, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

const VERSION: &str = "1.0";
const CONNECTION_TYPE: &str = "long-polling";

pub async fn bayeux_handler(
    State(state): State<AppState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    body: String,
) -> Response {
    let endpoint = connect_info
        .map_or_else(|| "unknown".to_string(), |info| info.0 .0.to_string());

    let Ok(request) = Value::from_json(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let messages: Vec<Value> = match &request {
        Value::Object(_) => vec![request.clone()],
        Value::Array(items) if items.iter().all(Value::is_object) => items.to_vec(),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    if messages.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let mut exchange = Exchange::new(state, endpoint);
    let last = messages.len() - 1;
    for (position, message) in messages.iter().enumerate() {
        exchange.handle_message(message, position == last);
    }

    exchange.finish().await
}

/// Per-exchange state: direct replies, the session the client addressed,
/// and the connect message the exchange may block on.
struct Exchange {
    state: AppState,
    endpoint: String,
    replies: Vec<Value>,
    session: Option<Arc<Session>>,
    /// Every session this exchange marked in use; released at the end.
    used: Vec<Arc<Session>>,
    /// Set when the last message was a valid `/meta/connect`.
    blocking_connect: Option<Value>,
}

impl Exchange {
    fn new(state: AppState, endpoint: String) -> Self {
        Self {
            state,
            endpoint,
            replies: Vec::new(),
            session: None,
            used: Vec::new(),
            blocking_connect: None,
        }
    }

    fn handle_message(&mut self, message: &Value, is_last: bool) {
        let Some(channel) = message.get("channel").and_then(Value::as_str) else {
            self.replies.push(error_reply(message, "", None, "channel missing"));
            return;
        };
        let channel = channel.to_owned();

        match channel.as_str() {
            "/meta/handshake" => self.handle_handshake(message),
            "/meta/connect" => self.handle_connect(message, is_last),
            "/meta/subscribe" => self.handle_subscribe(message),
            "/meta/unsubscribe" => self.handle_unsubscribe(message),
            "/meta/disconnect" => self.handle_disconnect(message),
            _ => self.handle_publish(message, &channel),
        }
    }

    fn handle_handshake(&mut self, message: &Value) {
        let supports_long_polling = message
            .get("supportedConnectionTypes")
            .and_then(Value::as_array)
            .is_some_and(|types| {
                types.iter().any(|t| t.as_str() == Some(CONNECTION_TYPE))
            });

        if !supports_long_polling {
            self.replies.push(
                ObjectBuilder::new()
                    .insert("channel", "/meta/handshake")
                    .insert("version", VERSION)
                    .insert("successful", false)
                    .insert("error", "unsupported connection type")
                    .insert(
                        "supportedConnectionTypes",
                        vec![Value::from(CONNECTION_TYPE)],
                    )
                    .insert_some("id", message.get("id").cloned())
                    .build(),
            );
            return;
        }

        let session = self.state.sessions.create(&self.endpoint, ProtocolStyle::Bayeux);
        self.replies.push(
            ObjectBuilder::new()
                .insert("channel", "/meta/handshake")
                .insert("version", VERSION)
                .insert("successful", true)
                .insert(
                    "supportedConnectionTypes",
                    vec![Value::from(CONNECTION_TYPE)],
                )
                .insert("clientId", session.id())
                .insert_some("id", message.get("id").cloned())
                .build(),
        );
        self.used.push(session);
    }

    fn handle_connect(&mut self, message: &Value, is_last: bool) {
        let Some(session) = self.resolve_session(message, "/meta/connect") else {
            return;
        };

        let connection_type = message.get("connectionType").and_then(Value::as_str);
        if connection_type != Some(CONNECTION_TYPE) {
            self.replies.push(error_reply(
                message,
                "/meta/connect",
                Some(session.id()),
                "unsupported connection type",
            ));
            return;
        }

        if is_last {
            self.blocking_connect = Some(message.clone());
        } else {
            // a connect followed by more commands answers immediately
            self.replies.push(connect_reply(message, session.id()));
        }
    }

    fn handle_subscribe(&mut self, message: &Value) {
        let Some(session) = self.resolve_session(message, "/meta/subscribe") else {
            return;
        };

        let subscription = message.get("subscription").and_then(Value::as_str);
        let Some(name) = subscription.and_then(channel_to_node_name) else {
            self.replies.push(
                ObjectBuilder::new()
                    .insert("channel", "/meta/subscribe")
                    .insert_some(
                        "subscription",
                        subscription.map(Value::from),
                    )
                    .insert("clientId", session.id())
                    .insert("successful", false)
                    .insert("error", "invalid subscription")
                    .insert_some("id", message.get("id").cloned())
                    .build(),
            );
            return;
        };

        session.subscribe(name, message.get("id").cloned(), None);
    }

    fn handle_unsubscribe(&mut self, message: &Value) {
        let Some(session) = self.resolve_session(message, "/meta/unsubscribe") else {
            return;
        };

        let subscription = message.get("subscription").and_then(Value::as_str);
        let Some(name) = subscription.and_then(channel_to_node_name) else {
            self.replies.push(
                ObjectBuilder::new()
                    .insert("channel", "/meta/unsubscribe")
                    .insert_some("subscription", subscription.map(Value::from))
                    .insert("clientId", session.id())
                    .insert("successful", false)
                    .insert("error", "invalid subscription")
                    .insert_some("id", message.get("id").cloned())
                    .build(),
            );
            return;
        };

        session.unsubscribe(&name, message.get("id"));
    }

    fn handle_disconnect(&mut self, message: &Value) {
        let Some(session) = self.resolve_session(message, "/meta/disconnect") else {
            return;
        };

        self.state.sessions.remove(session.id());
        session.shut_down();

        self.replies.push(
            ObjectBuilder::new()
                .insert("channel", "/meta/disconnect")
                .insert("clientId", session.id())
                .insert("successful", true)
                .insert_some("id", message.get("id").cloned())
                .build(),
        );
    }

    /// Application channels carry publications: the channel maps onto a
    /// node name and the payload becomes the node's new value.
    fn handle_publish(&mut self, message: &Value, channel: &str) {
        let Some(session) = self.resolve_session(message, channel) else {
            return;
        };

        let Some(name) = channel_to_node_name(channel) else {
            self.replies.push(error_reply(
                message,
                channel,
                Some(session.id()),
                "invalid channel",
            ));
            return;
        };

        let data = message.get("data").cloned().unwrap_or(Value::Null);
        self.state.root.update_node(&name, &data);

        self.replies.push(
            ObjectBuilder::new()
                .insert("channel", channel)
                .insert("clientId", session.id())
                .insert("successful", true)
                .insert_some("id", message.get("id").cloned())
                .build(),
        );
    }

    /// Resolves the message's `clientId` into a session, marking it in
    /// use. Emits the error reply itself when that fails.
    fn resolve_session(&mut self, message: &Value, channel: &str) -> Option<Arc<Session>> {
        let Some(client_id) = message.get("clientId").and_then(Value::as_str) else {
            self.replies.push(error_reply(message, channel, None, "invalid clientId"));
            return None;
        };

        if let Some(session) = self.session.as_ref().filter(|s| s.id() == client_id) {
            return Some(Arc::clone(session));
        }

        match self.state.sessions.find(client_id) {
            Some(session) => {
                self.used.push(Arc::clone(&session));
                self.session = Some(Arc::clone(&session));
                Some(session)
            },
            None => {
                debug!(client_id, channel, "request for unknown client id");
                self.replies.push(error_reply(message, channel, None, "invalid clientId"));
                None
            },
        }
    }

    async fn finish(mut self) -> Response {
        if let Some(connect) = self.blocking_connect.take() {
            self.finish_blocking(connect).await
        } else {
            // surface whatever the session buffered during this exchange
            if let Some(session) = &self.session {
                self.replies.extend(session.events());
            }
            self.respond()
        }
    }

    async fn finish_blocking(mut self, connect: Value) -> Response {
        let session = self
            .session
            .clone()
            .unwrap_or_else(|| unreachable!("blocking connect implies a session"));

        let events = match session.wait_for_events() {
            Wait::Ready(events) => events,
            Wait::Park { receiver, generation } => {
                let timeout = self.state.config.pubsub.long_polling_timeout_secs;
                match tokio::time::timeout(
                    std::time::Duration::from_secs(timeout),
                    receiver,
                )
                .await
                {
                    Ok(Ok(events)) => events,
                    // timeout or a dropped sender both answer empty
                    Ok(Err(_)) | Err(_) => {
                        session.abandon_wait(generation);
                        Vec::new()
                    },
                }
            },
        };

        self.replies.extend(events);
        self.replies.push(connect_reply(&connect, session.id()));
        self.respond()
    }

    fn respond(self) -> Response {
        for session in &self.used {
            self.state.sessions.idle(session);
        }

        let body = Value::array(self.replies).to_json();
        ([(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

fn connect_reply(message: &Value, session_id: &str) -> Value {
    ObjectBuilder::new()
        .insert("channel", "/meta/connect")
        .insert("clientId", session_id)
        .insert("successful", true)
        .insert_some("id", message.get("id").cloned())
        .build()
}

fn error_reply(
    message: &Value,
    channel: &str,
    session_id: Option<&str>,
    error: &str,
) -> Value {
    ObjectBuilder::new()
        .insert("channel", channel)
        .insert_some("clientId", session_id.map(Value::from))
        .insert("successful", false)
        .insert("error", error)
        .insert_some("id", message.get("id").cloned())
        .build()
}
