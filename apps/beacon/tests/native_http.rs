// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Native protocol scenarios: single JSON envelopes per exchange.

mod common;

use axum::http::StatusCode;
use beacon_core::{apply, Value};
use beacon_pubsub::test_util::Answer;
use beacon_pubsub::NodeName;
use common::{open_config, parse, test_app, TestApp};
use std::time::Duration;

fn node(text: &str) -> NodeName {
    NodeName::from_value(&parse(text)).expect("valid node name")
}

/// Extracts the session id from a reply envelope.
fn id_of(envelope: &Value) -> String {
    envelope.get("id").and_then(Value::as_str).expect("reply carries an id").to_owned()
}

async fn subscribe(app: &TestApp, key: &str) -> (String, Value) {
    let reply = app
        .native(&format!(r#"{{"cmd":[{{"subscribe":{key}}}]}}"#))
        .await;
    (id_of(&reply), reply)
}

#[tokio::test]
async fn malformed_envelopes_are_bad_requests() {
    let app = test_app(open_config());

    for body in ["not json", "[1,2]", "{}", r#"{"cmd":{}}"#, r#"{"cmd":[1]}"#] {
        let (status, _) = app.post("/pubsub", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "for body {body}");
    }
}

#[tokio::test]
async fn a_subscription_returns_the_id_and_a_snapshot() {
    let app = test_app(open_config());
    app.adapter.set_initial_value(&node(r#"{"a":"1","b":"2"}"#), parse("[1,2,3]"));

    let reply = app.native(r#"{"cmd":[{"subscribe":{"a":"1","b":"2"}}]}"#).await;

    assert_eq!(
        reply,
        parse(
            r#"{"id":"192.168.210.1:9999/0","update":[{"key":{"a":"1","b":"2"},"data":[1,2,3],"version":1}]}"#
        )
    );
}

#[tokio::test]
async fn an_unknown_session_id_is_replaced() {
    let app = test_app(open_config());

    let reply = app.native(r#"{"id":"stale"}"#).await;
    assert_ne!(id_of(&reply), "stale");
}

#[tokio::test]
async fn polling_returns_buffered_updates() {
    let app = test_app(open_config());
    let name = node(r#"{"a":"1"}"#);
    app.adapter.set_initial_value(&name, parse("1"));

    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;
    app.state.root.update_node(&name, &parse("2"));

    let reply = app.native(&format!(r#"{{"id":"{id}"}}"#)).await;
    let updates = reply.get("update").and_then(Value::as_array).expect("updates present");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].get("data"), Some(&parse("2")));
    assert_eq!(updates[0].get("version"), Some(&parse("2")));
}

#[tokio::test]
async fn clients_behind_by_a_version_receive_deltas() {
    let app = test_app(open_config());
    let name = node(r#"{"a":"1"}"#);
    app.adapter.set_initial_value(&name, parse("[1,2,3,4,5,6,7,8,10]"));

    let (id, reply) = subscribe(&app, r#"{"a":"1"}"#).await;
    let snapshot = reply.get("update").and_then(Value::as_array).expect("snapshot")[0].clone();
    assert_eq!(snapshot.get("data"), Some(&parse("[1,2,3,4,5,6,7,8,10]")));

    app.state.root.update_node(&name, &parse("[1,3,4,5,6,7,8,10]"));

    let reply = app.native(&format!(r#"{{"id":"{id}"}}"#)).await;
    let update = reply.get("update").and_then(Value::as_array).expect("updates")[0].clone();

    // a delta, not a snapshot: apply it to the old value
    assert_eq!(update.get("from"), Some(&parse("1")));
    assert_eq!(update.get("version"), Some(&parse("2")));
    let script = update.get("update").expect("delta script");
    assert_eq!(
        apply(&parse("[1,2,3,4,5,6,7,8,10]"), script).expect("script applies"),
        parse("[1,3,4,5,6,7,8,10]")
    );
}

#[tokio::test]
async fn resubscribing_with_a_known_version_resumes_with_a_delta() {
    let app = test_app(open_config());
    let name = node(r#"{"a":"1"}"#);
    app.adapter.set_initial_value(&name, parse("[1,2,3,4,5,6,7,8,10]"));

    // one client establishes the node and moves it forward
    let (_, reply) = subscribe(&app, r#"{"a":"1"}"#).await;
    assert!(reply.get("update").is_some());
    app.state.root.update_node(&name, &parse("[1,3,4,5,6,7,8,10]"));

    // a second client knows version 1 already
    let reply = app.native(r#"{"cmd":[{"subscribe":{"a":"1"},"version":1}]}"#).await;
    let update = reply.get("update").and_then(Value::as_array).expect("updates")[0].clone();
    assert_eq!(update.get("from"), Some(&parse("1")));
    assert!(update.get("update").is_some(), "expected a delta, got {update}");
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_acks_and_stops_updates() {
    let app = test_app(open_config());
    let name = node(r#"{"a":"1"}"#);
    app.adapter.set_initial_value(&name, parse("1"));

    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;

    let reply = app
        .native(&format!(r#"{{"id":"{id}","cmd":[{{"unsubscribe":{{"a":"1"}}}}]}}"#))
        .await;
    assert_eq!(
        reply.get("resp"),
        Some(&parse(r#"[{"unsubscribe":{"a":"1"}}]"#))
    );

    app.state.root.update_node(&name, &parse("2"));
    // nothing buffered: the next poll long-polls and times out empty
    let reply = app.native(&format!(r#"{{"id":"{id}"}}"#)).await;
    assert_eq!(reply.get("update"), Some(&parse("[]")));
}

#[tokio::test]
async fn unsubscribing_an_unknown_key_is_an_error_response() {
    let app = test_app(open_config());
    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;

    let reply = app
        .native(&format!(r#"{{"id":"{id}","cmd":[{{"unsubscribe":{{"z":"9"}}}}]}}"#))
        .await;

    assert_eq!(
        reply.get("resp"),
        Some(&parse(r#"[{"unsubscribe":{"z":"9"},"error":"not subscribed"}]"#))
    );
}

#[tokio::test]
async fn invalid_subscription_keys_are_rejected_per_command() {
    let app = test_app(open_config());

    let reply = app.native(r#"{"cmd":[{"subscribe":5},{"subscribe":{}}]}"#).await;
    let resp = reply.get("resp").and_then(Value::as_array).expect("responses");

    assert_eq!(resp.len(), 2);
    assert_eq!(
        resp[0].get("error").and_then(Value::as_str),
        Some("node name must be an object")
    );
    assert_eq!(
        resp[1].get("error").and_then(Value::as_str),
        Some("node name must not be empty")
    );
}

#[tokio::test]
async fn rejected_nodes_produce_command_errors() {
    let app = test_app(open_config());
    let name = node(r#"{"a":"1"}"#);
    app.adapter.answer_validation(&name, Answer::Deny);

    let reply = app.native(r#"{"cmd":[{"subscribe":{"a":"1"}}]}"#).await;

    assert_eq!(
        reply.get("resp"),
        Some(&parse(r#"[{"subscribe":{"a":"1"},"error":"invalid node"}]"#))
    );
}

#[tokio::test(start_paused = true)]
async fn an_empty_poll_times_out_with_an_empty_update() {
    let mut config = open_config();
    config.pubsub.long_polling_timeout_secs = 30;
    let app = test_app(config);

    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;

    let started = tokio::time::Instant::now();
    let reply = app.native(&format!(r#"{{"id":"{id}"}}"#)).await;

    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(reply, parse(&format!(r#"{{"id":"{id}","update":[]}}"#)));
}

#[tokio::test(start_paused = true)]
async fn a_parked_poll_wakes_on_an_update() {
    let app = test_app(open_config());
    let name = node(r#"{"a":"1"}"#);
    app.adapter.set_initial_value(&name, parse("1"));

    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;

    let poll = {
        let app = app.clone();
        let body = format!(r#"{{"id":"{id}"}}"#);
        tokio::spawn(async move { app.native(&body).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    app.state.root.update_node(&name, &parse("2"));

    let reply = poll.await.expect("poll completes");
    let updates = reply.get("update").and_then(Value::as_array).expect("updates");
    assert_eq!(updates[0].get("data"), Some(&parse("2")));
}

#[tokio::test(start_paused = true)]
async fn a_busy_session_is_not_handed_out_twice() {
    let app = test_app(open_config());
    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;

    let first = {
        let app = app.clone();
        let body = format!(r#"{{"id":"{id}"}}"#);
        tokio::spawn(async move { app.native(&body).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // the same id arrives again while the first poll still holds it
    let reply = app.native(&format!(r#"{{"id":"{id}"}}"#)).await;
    assert_ne!(id_of(&reply), id, "second exchange must get a fresh session");

    let _ = first.await;
}

#[tokio::test(start_paused = true)]
async fn idle_native_sessions_expire() {
    let mut config = open_config();
    config.pubsub.session_timeout_secs = 5;
    let app = test_app(config);

    let (id, _) = subscribe(&app, r#"{"a":"1"}"#).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    // the session timed out; the old id no longer resolves
    let reply = app.native(&format!(r#"{{"id":"{id}"}}"#)).await;
    assert_ne!(id_of(&reply), id);
}
