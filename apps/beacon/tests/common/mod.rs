// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared plumbing for the protocol test suites: an in-process app plus
//! a tiny client driving it through `tower::ServiceExt`.

// not every suite uses every helper
#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use beacon_core::Value;
use beacon_pubsub::test_util::ScriptedAdapter;
use beacon_server::state::AppState;
use beacon_server::{create_app, Config, CountingSessionGenerator};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

/// The client end point every test request appears to come from; the
/// counting generator folds it into session ids.
pub const ENDPOINT: [u8; 4] = [192, 168, 210, 1];
pub const ENDPOINT_PORT: u16 = 9999;

#[derive(Clone)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub adapter: Arc<ScriptedAdapter>,
}

pub fn test_app(config: Config) -> TestApp {
    let adapter = Arc::new(ScriptedAdapter::new());
    let (router, state) = create_app(
        config,
        Arc::clone(&adapter) as _,
        Box::new(CountingSessionGenerator::default()),
    );
    TestApp { router, state, adapter }
}

/// A config with authorization disabled; most scenarios do not exercise
/// the authorization stage.
pub fn open_config() -> Config {
    let mut config = Config::default();
    config.pubsub.authorization_required = false;
    config
}

impl TestApp {
    /// Posts a JSON body and returns status plus parsed reply (`null`
    /// for an empty body).
    pub async fn post(&self, path: &str, body: &str) -> (StatusCode, Value) {
        let address = SocketAddr::from((ENDPOINT, ENDPOINT_PORT));
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .extension(ConnectInfo(address))
            .body(Body::from(body.to_owned()))
            .expect("request builds");

        let response =
            self.router.clone().oneshot(request).await.expect("infallible service");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();

        let value = if bytes.is_empty() {
            Value::Null
        } else {
            Value::from_json(std::str::from_utf8(&bytes).expect("utf-8 body"))
                .expect("json body")
        };
        (status, value)
    }

    /// Posts to the Bayeux endpoint and returns the reply message array.
    pub async fn bayeux(&self, body: &str) -> Vec<Value> {
        let (status, reply) = self.post("/bayeux", body).await;
        assert_eq!(status, StatusCode::OK, "unexpected status for {body}");
        reply.as_array().expect("bayeux reply is an array").to_vec()
    }

    /// Posts to the native endpoint and returns the reply envelope.
    pub async fn native(&self, body: &str) -> Value {
        let (status, reply) = self.post("/pubsub", body).await;
        assert_eq!(status, StatusCode::OK, "unexpected status for {body}");
        reply
    }
}

pub fn parse(text: &str) -> Value {
    Value::from_json(text).expect("valid json")
}

/// The node name a Bayeux channel such as `/foo/bar` maps to.
pub fn channel_name(channel: &str) -> beacon_pubsub::NodeName {
    let mut name = beacon_pubsub::NodeName::new();
    for (i, segment) in channel.trim_start_matches('/').split('/').enumerate() {
        name = name.with_key(beacon_pubsub::Key::new(format!("p{}", i + 1), segment));
    }
    name
}
