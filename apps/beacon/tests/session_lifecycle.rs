// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Session lifecycle over the wire: asynchronous subscription outcomes,
//! buffer limits, double polls and session expiry.

mod common;

use beacon_core::Value;
use beacon_pubsub::test_util::Answer;
use common::{channel_name, open_config, parse, test_app, TestApp};
use std::time::Duration;

async fn handshake(app: &TestApp) -> String {
    let reply = app
        .bayeux(
            r#"{"channel":"/meta/handshake","version":"1.0.0","supportedConnectionTypes":["long-polling"]}"#,
        )
        .await;
    reply[0]
        .get("clientId")
        .and_then(Value::as_str)
        .expect("handshake assigns a client id")
        .to_owned()
}

#[tokio::test(start_paused = true)]
async fn deferred_validation_acks_through_a_later_poll() {
    let app = test_app(open_config());
    let node = channel_name("/slow/node");
    app.adapter.answer_validation(&node, Answer::Defer);
    app.adapter.set_initial_value(&node, parse("\"ready\""));

    let client_id = handshake(&app).await;

    // the subscribe returns without an ack: the adapter has not answered
    let reply = app
        .bayeux(&format!(
            r#"{{"channel":"/meta/subscribe","clientId":"{client_id}","subscription":"/slow/node"}}"#
        ))
        .await;
    assert_eq!(reply, vec![]);

    // a poll parks; the adapter answers while it is parked
    let poll = {
        let app = app.clone();
        let body = format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"long-polling"}}"#
        );
        tokio::spawn(async move { app.bayeux(&body).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(app.adapter.complete_validation(&node, true));

    let reply = poll.await.expect("poll completes");
    assert_eq!(
        reply,
        vec![
            parse(&format!(
                r#"{{"channel":"/meta/subscribe","subscription":"/slow/node","clientId":"{client_id}","successful":true}}"#
            )),
            parse(r#"{"channel":"/slow/node","data":"ready"}"#),
            parse(&format!(
                r#"{{"channel":"/meta/connect","clientId":"{client_id}","successful":true}}"#
            )),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn deferred_rejection_arrives_as_a_negative_ack() {
    let app = test_app(open_config());
    let node = channel_name("/slow/node");
    app.adapter.answer_validation(&node, Answer::Defer);

    let client_id = handshake(&app).await;
    app.bayeux(&format!(
        r#"{{"channel":"/meta/subscribe","clientId":"{client_id}","subscription":"/slow/node"}}"#
    ))
    .await;

    let poll = {
        let app = app.clone();
        let body = format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"long-polling"}}"#
        );
        tokio::spawn(async move { app.bayeux(&body).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(app.adapter.complete_validation(&node, false));

    let reply = poll.await.expect("poll completes");
    assert_eq!(
        reply[0],
        parse(&format!(
            r#"{{"channel":"/meta/subscribe","subscription":"/slow/node","clientId":"{client_id}","successful":false,"error":"invalid node"}}"#
        ))
    );
}

#[tokio::test]
async fn the_buffer_drops_oldest_messages_over_the_count_cap() {
    let mut config = open_config();
    config.pubsub.max_messages_per_client = 3;
    let app = test_app(config);

    let node = channel_name("/ticker");
    app.adapter.set_initial_value(&node, parse("0"));

    let client_id = handshake(&app).await;
    app.bayeux(&format!(
        r#"{{"channel":"/meta/subscribe","clientId":"{client_id}","subscription":"/ticker"}}"#
    ))
    .await;

    // ten updates while nobody polls; only the last three survive
    for i in 1..=10 {
        app.state.root.update_node(&node, &Value::Int(i));
    }

    let reply = app
        .bayeux(&format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"long-polling"}}"#
        ))
        .await;

    assert_eq!(
        reply,
        vec![
            parse(r#"{"channel":"/ticker","data":8}"#),
            parse(r#"{"channel":"/ticker","data":9}"#),
            parse(r#"{"channel":"/ticker","data":10}"#),
            parse(&format!(
                r#"{{"channel":"/meta/connect","clientId":"{client_id}","successful":true}}"#
            )),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn expired_sessions_lose_their_subscriptions() {
    let mut config = open_config();
    config.pubsub.session_timeout_secs = 5;
    let app = test_app(config);

    let node = channel_name("/data");
    app.adapter.set_initial_value(&node, parse("1"));

    let client_id = handshake(&app).await;
    app.bayeux(&format!(
        r#"{{"channel":"/meta/subscribe","clientId":"{client_id}","subscription":"/data"}}"#
    ))
    .await;
    assert_eq!(app.state.sessions.session_count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(app.state.sessions.session_count(), 0);

    // the client id is gone; its connect is now a protocol error
    let reply = app
        .bayeux(&format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"long-polling"}}"#
        ))
        .await;
    assert_eq!(reply[0].get("error").and_then(Value::as_str), Some("invalid clientId"));
}

#[tokio::test(start_paused = true)]
async fn a_poll_holds_the_session_open_past_the_idle_timeout() {
    let mut config = open_config();
    config.pubsub.session_timeout_secs = 5;
    config.pubsub.long_polling_timeout_secs = 60;
    let app = test_app(config);

    let client_id = handshake(&app).await;

    let poll = {
        let app = app.clone();
        let body = format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"long-polling"}}"#
        );
        tokio::spawn(async move { app.bayeux(&body).await })
    };

    // well past the idle timeout, but the poll still holds a use
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(app.state.sessions.session_count(), 1);

    let _ = poll.await;
}

#[tokio::test]
async fn registry_shutdown_flushes_parked_polls() {
    let app = test_app(open_config());
    let client_id = handshake(&app).await;

    let poll = {
        let app = app.clone();
        let body = format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"long-polling"}}"#
        );
        tokio::spawn(async move { app.bayeux(&body).await })
    };
    tokio::task::yield_now().await;

    app.state.sessions.shut_down();

    // the parked poll returns an ordinary empty connect response
    let reply = poll.await.expect("poll completes");
    assert_eq!(
        reply,
        vec![parse(&format!(
            r#"{{"channel":"/meta/connect","clientId":"{client_id}","successful":true}}"#
        ))]
    );
}
