// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! HTTP front end: router assembly, startup and graceful shutdown.

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use beacon_pubsub::{
    Adapter, AuthorizationReply, InitReply, NodeName, Root, SubscriberId, ValidationReply,
};

use crate::bayeux::bayeux_handler;
use crate::config::Config;
use crate::native::native_handler;
use crate::registry::{SecureSessionGenerator, SessionGenerator, SessionRegistry};
use crate::state::AppState;

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// The built-in adapter: every node is valid, everyone is authorized,
/// nodes start as `null`. Real deployments embed the server as a library
/// and pass their own adapter to [`create_app`].
#[derive(Debug, Default)]
pub struct PermissiveAdapter;

impl Adapter for PermissiveAdapter {
    fn validate_node(&self, _name: &NodeName, reply: ValidationReply) {
        reply.is_valid();
    }

    fn authorize(&self, _subscriber: SubscriberId, _name: &NodeName, reply: AuthorizationReply) {
        reply.is_authorized();
    }

    fn node_init(&self, _name: &NodeName, reply: InitReply) {
        reply.initial_value(beacon_core::Value::Null);
    }
}

/// Builds the router and the shared state.
///
/// The adapter and session-id generator are injection points: tests pass
/// a scripted adapter and the deterministic generator.
pub fn create_app(
    config: Config,
    adapter: Arc<dyn Adapter>,
    generator: Box<dyn SessionGenerator>,
) -> (Router, AppState) {
    let default_configuration = config.pubsub.to_configuration();

    let root = Root::new(adapter, default_configuration.clone());
    for group in &config.pubsub.groups {
        root.add_configuration(group.to_group(), group.to_configuration(&default_configuration));
    }

    let sessions = SessionRegistry::new(
        Arc::clone(&root),
        Arc::new(default_configuration),
        generator,
    );

    let state =
        AppState { root, sessions, config: Arc::new(config) };

    let router = Router::new()
        .route("/healthz", get(health_handler))
        .route("/bayeux", post(bayeux_handler))
        .route("/pubsub", post(native_handler))
        // a panicking adapter costs the exchange a 500, not the server
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (router, state)
}

/// Binds the configured address and serves until ctrl-c or SIGTERM.
///
/// # Errors
///
/// Returns an error when the address cannot be bound.
pub async fn start_server(config: Config) -> Result<(), anyhow::Error> {
    let address = config.server.address.clone();
    let (router, state) = create_app(
        config,
        Arc::new(PermissiveAdapter),
        Box::new(SecureSessionGenerator),
    );

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "listening");

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                },
                Err(_) => std::future::pending().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("Received CTRL-C signal, initiating graceful shutdown"),
            () = terminate => info!("Received SIGTERM signal, initiating graceful shutdown"),
        }

        shutdown_state.sessions.shut_down();
    };

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    Ok(())
}
