// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ride-dispatch: realtime matching and dispatch engine for ride-hailing.
//!
//! Wiring follows `coopmux::run` — construct shared state, spawn background
//! workers, build the axum router, serve with graceful shutdown.

pub mod auth;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod geo;
pub mod hub;
pub mod matcher;
pub mod model;
pub mod router;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bus::NatsEventBus;
use crate::collaborators::{NullRideStore, RideStore};
use crate::config::DispatchConfig;
use crate::geo::{GeoCache, RedisGeoCache};
use crate::hub::ws::{ws_handler, WsState};
use crate::hub::SessionHub;
use crate::matcher::Matcher;
use crate::router::Router as RealtimeRouter;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    session_count: usize,
}

async fn healthz(State(state): State<WsState>) -> impl IntoResponse {
    Json(HealthResponse { status: "running", session_count: state.hub.client_count().await })
}

/// Run the dispatch engine until an OS shutdown signal is received, using a
/// no-op `RideStore` (no ride-room join/leave authorization). Production
/// deployments that need real authorization should call
/// [`run_with_ride_store`] with their own collaborator.
pub async fn run(config: DispatchConfig) -> anyhow::Result<()> {
    run_with_ride_store(config, Arc::new(NullRideStore)).await
}

/// Run the dispatch engine with an injected [`RideStore`] collaborator.
pub async fn run_with_ride_store(config: DispatchConfig, ride_store: Arc<dyn RideStore>) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    let geo: Arc<dyn GeoCache> = Arc::new(RedisGeoCache::connect(&config).await?);
    let bus = Arc::new(NatsEventBus::connect(&config).await?);
    let hub = SessionHub::new();

    let realtime_router = RealtimeRouter::new(Arc::clone(&geo), Arc::clone(&ride_store));
    realtime_router.install(&hub).await;

    let matcher = Matcher::new(Arc::clone(&geo), Arc::clone(&hub), ride_store, Arc::clone(&config));
    Arc::clone(&matcher).run(Arc::clone(&bus), shutdown.clone()).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let ws_state = WsState { hub: Arc::clone(&hub), config: Arc::clone(&config) };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/session", get(ws_handler))
        .with_state(ws_state);

    tracing::info!(%addr, "ride-dispatch listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(drain(shutdown, Arc::clone(&hub))).await?;

    Ok(())
}

/// Graceful shutdown sequence (spec §5): drain the hub first (close every
/// live client session), then signal the bus subscription/matcher tasks to
/// stop, then let the caller's `axum::serve` stop accepting connections.
/// Bus/geo adapters close their underlying connections on drop once `run`
/// returns.
async fn drain(shutdown: CancellationToken, hub: Arc<SessionHub>) {
    wait_for_signal().await;
    tracing::info!("shutdown requested, draining session hub");
    hub.shutdown().await;
    shutdown.cancel();
    // Give the bus subscription tasks one scheduling pass to observe
    // cancellation before the listener stops.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            tracing::warn!(%err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
