//! SFU Signaling Service
//!
//! WebSocket signaling server for a Selective Forwarding Unit.
//!
//! # Servers
//!
//! - WebSocket gateway for client signaling (default: 0.0.0.0:3001)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Create the media engine and the shared router (fatal on failure)
//! 5. Spawn the `SignalingHub`
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start the WebSocket gateway
//! 8. Wait for shutdown signal, then drain every connection

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use common::config::LogFormat;
use sfu_service::actors::{ActorMetrics, SignalingContext, SignalingHubHandle};
use sfu_service::config::Config;
use sfu_service::engine::{default_media_codecs, LocalEngine, MediaEngine};
use sfu_service::errors::SfuError;
use sfu_service::gateway::gateway_router;
use sfu_service::observability::{health_router, init_metrics_recorder, HealthState};
use sfu_service::registry::SessionRegistry;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the HTTP servers to stop after connections drained.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting SFU signaling service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        SfuError::from(e)
    })?;

    info!(
        sfu_id = %config.sfu_id,
        gateway_bind_address = %config.gateway_bind_address,
        health_bind_address = %config.health_bind_address,
        listen_ip = %config.listen_ip,
        announced_ip = ?config.announced_ip,
        video_start_bitrate = config.video_start_bitrate,
        shutdown_deadline_secs = config.shutdown_deadline.as_secs(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::Error::msg(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Media engine and the single router every connection shares
    let engine: Arc<dyn MediaEngine> = Arc::new(LocalEngine::new(config.engine_config()));
    let router = engine
        .create_router(default_media_codecs(config.video_start_bitrate))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create media router");
            e
        })
        .context("media router creation failed")?;
    info!(
        router_id = %router.id,
        codecs = router.rtp_capabilities.codecs.len(),
        "Media router created"
    );
    health_state.set_router_created();

    // Initialize actor system
    let ctx = SignalingContext {
        engine,
        router: Arc::new(router),
        registry: Arc::new(SessionRegistry::new()),
    };
    let actor_metrics = ActorMetrics::new();
    let hub = SignalingHubHandle::new(config.sfu_id.clone(), ctx, Arc::clone(&actor_metrics));
    info!("Actor system initialized");

    let shutdown_token = CancellationToken::new();

    // Start health HTTP server (liveness, readiness and Prometheus /metrics)
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_addr = config.health_bind_address;
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_task = spawn_server(
        "health",
        health_listener,
        health_app,
        shutdown_token.child_token(),
    );

    // Start the WebSocket gateway
    let gateway_addr = config.gateway_bind_address;
    let gateway_listener = tokio::net::TcpListener::bind(gateway_addr)
        .await
        .with_context(|| format!("failed to bind gateway to {gateway_addr}"))?;
    info!(addr = %gateway_addr, "Gateway bound successfully");

    let gateway_task = spawn_server(
        "gateway",
        gateway_listener,
        gateway_router(hub.clone()),
        shutdown_token.child_token(),
    );
    health_state.set_gateway_bound();

    info!("SFU signaling service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_draining();

    // Release every session before the servers go away
    if let Err(e) = hub.shutdown(config.shutdown_deadline).await {
        warn!(error = %e, "Actor system shutdown error");
    }
    info!(
        sessions_released = actor_metrics.sessions_released(),
        "All connections drained"
    );

    shutdown_token.cancel();
    for (name, task) in [("health", health_task), ("gateway", gateway_task)] {
        if tokio::time::timeout(SERVER_STOP_TIMEOUT, task).await.is_err() {
            warn!(server = name, "Server did not stop in time");
        }
    }

    info!("SFU signaling service shutdown complete");
    Ok(())
}

/// Install the global subscriber.
///
/// Reads `SFU_LOG_FORMAT` directly because tracing is up before the config
/// is loaded; an invalid value falls back to text and is reported by config
/// loading.
fn init_tracing() {
    let format: LogFormat = std::env::var("SFU_LOG_FORMAT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_default();

    let (json_layer, text_layer) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sfu_service=debug,tower_http=info".into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn spawn_server(
    name: &'static str,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(server = name, "Server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!(server = name, "Server shutting down");
        });
        if let Err(e) = server.await {
            error!(server = name, error = %e, "Server failed");
        }
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
