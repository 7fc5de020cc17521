// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A minimal beacon deployment: one node, `{feed: ticker}`, holding a
//! counter that advances every second. Connect with
//!
//! ```text
//! curl -d '{"cmd":[{"subscribe":{"feed":"ticker"}}]}' localhost:8080/pubsub
//! curl -d '{"id":"<id from the first reply>"}' localhost:8080/pubsub
//! ```
//!
//! and watch updates arrive as deltas.

use beacon_core::{ObjectBuilder, Value};
use beacon_pubsub::{
    Adapter, AuthorizationReply, InitReply, Key, LoggingAdapter, NodeName, SubscriberId,
    ValidationReply,
};
use beacon_server::registry::SecureSessionGenerator;
use beacon_server::{create_app, Config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Accepts only the ticker node; everything is readable by everyone.
struct TickerAdapter;

impl Adapter for TickerAdapter {
    fn validate_node(&self, name: &NodeName, reply: ValidationReply) {
        if *name == ticker_name() {
            reply.is_valid();
        } else {
            reply.not_valid();
        }
    }

    fn authorize(&self, _subscriber: SubscriberId, _name: &NodeName, reply: AuthorizationReply) {
        reply.is_authorized();
    }

    fn node_init(&self, _name: &NodeName, reply: InitReply) {
        reply.initial_value(ticker_value(0));
    }
}

fn ticker_name() -> NodeName {
    NodeName::new().with_key(Key::new("feed", "ticker"))
}

fn ticker_value(count: i64) -> Value {
    ObjectBuilder::new().insert("count", count).build()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::default();
    config.pubsub.authorization_required = false;

    let (router, state) = create_app(
        config,
        Arc::new(LoggingAdapter::new(TickerAdapter)),
        Box::new(SecureSessionGenerator),
    );

    let root = Arc::clone(&state.root);
    tokio::spawn(async move {
        let name = ticker_name();
        let mut count = 0_i64;
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            count += 1;
            root.update_node(&name, &ticker_value(count));
        }
    });

    let address = "127.0.0.1:8080";
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {address}: {e}"));
    info!(%address, "ticker demo listening");

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service).await {
        tracing::error!(error = %e, "server stopped");
    }
}
