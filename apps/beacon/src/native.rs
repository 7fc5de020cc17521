// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The native protocol responder.
//!
//! Leaner than Bayeux: one JSON object per HTTP exchange. The envelope
//! carries a session id and/or a command list; the reply carries the
//! session id, command responses (`resp`) and data pushes (`update`).
//! An exchange that produced nothing to say long-polls instead.

use crate::session::{ProtocolStyle, Session, Wait};
use crate::state::AppState;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use beacon_core::{ObjectBuilder, Value};
use beacon_pubsub::{NodeName, NodeVersion};
use std::net::SocketAddr;
use std::sync::Arc;

pub async fn native_handler(
    State(state): State<AppState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    body: String,
) -> Response {
    let endpoint = connect_info
        .map_or_else(|| "unknown".to_string(), |info| info.0 .0.to_string());

    let Ok(envelope) = Value::from_json(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(members) = envelope.as_object() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    // the id is opaque to clients; anything that is not one of our own
    // string ids simply does not resolve to a session
    let id_given = members.get("id").is_some();
    let session_id = members.get("id").and_then(Value::as_str);

    let commands: Vec<Value> = match members.get("cmd") {
        None => Vec::new(),
        Some(Value::Array(items)) if items.iter().all(Value::is_object) => items.to_vec(),
        Some(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    // an envelope with neither a session nor work to do is malformed
    if !id_given && commands.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let (session, created) =
        state.sessions.find_or_create(session_id, &endpoint, ProtocolStyle::Native);

    let mut responses: Vec<Value> = Vec::new();
    for command in &commands {
        execute_command(&session, command, &mut responses);
    }

    // acks and updates the commands produced synchronously
    let buffered = session.events();
    let (resp, update) = partition(buffered, responses);

    if created || !resp.is_empty() || !update.is_empty() {
        let response = respond(&session, resp, update, false);
        state.sessions.idle(&session);
        return response;
    }

    let response = long_poll(&state, &session).await;
    state.sessions.idle(&session);
    response
}

fn execute_command(session: &Arc<Session>, command: &Value, responses: &mut Vec<Value>) {
    if let Some(key) = command.get("subscribe") {
        match NodeName::from_value(key) {
            Ok(name) => {
                let from = command.get("version").and_then(NodeVersion::from_value);
                session.subscribe(name, None, from);
            },
            Err(error) => responses.push(
                ObjectBuilder::new()
                    .insert("subscribe", key.clone())
                    .insert("error", error.to_string())
                    .build(),
            ),
        }
    } else if let Some(key) = command.get("unsubscribe") {
        match NodeName::from_value(key) {
            Ok(name) => session.unsubscribe(&name, None),
            Err(error) => responses.push(
                ObjectBuilder::new()
                    .insert("unsubscribe", key.clone())
                    .insert("error", error.to_string())
                    .build(),
            ),
        }
    } else {
        responses.push(
            ObjectBuilder::new().insert("error", "invalid command").build(),
        );
    }
}

/// Splits buffered messages into command responses and data updates:
/// updates carry a `"key"` member, everything else answers a command.
fn partition(buffered: Vec<Value>, mut responses: Vec<Value>) -> (Vec<Value>, Vec<Value>) {
    let mut updates = Vec::new();
    for message in buffered {
        if message.get("key").is_some() {
            updates.push(message);
        } else {
            responses.push(message);
        }
    }
    (responses, updates)
}

async fn long_poll(state: &AppState, session: &Arc<Session>) -> Response {
    let events = match session.wait_for_events() {
        Wait::Ready(events) => events,
        Wait::Park { receiver, generation } => {
            let timeout = state.config.pubsub.long_polling_timeout_secs;
            match tokio::time::timeout(std::time::Duration::from_secs(timeout), receiver)
                .await
            {
                Ok(Ok(events)) => events,
                Ok(Err(_)) | Err(_) => {
                    session.abandon_wait(generation);
                    Vec::new()
                },
            }
        },
    };

    let (resp, update) = partition(events, Vec::new());
    // a timed-out poll answers with an explicitly empty update list
    respond(session, resp, update, true)
}

fn respond(
    session: &Arc<Session>,
    resp: Vec<Value>,
    update: Vec<Value>,
    empty_update_allowed: bool,
) -> Response {
    let mut builder = ObjectBuilder::new().insert("id", session.id());
    if !resp.is_empty() {
        builder = builder.insert("resp", resp);
    }
    if !update.is_empty() || empty_update_allowed {
        builder = builder.insert("update", update);
    }

    let body = builder.build().to_json();
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
