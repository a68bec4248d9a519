//! Liveness and readiness endpoints.
//!
//! - `GET /health` - process is running
//! - `GET /ready` - router created, gateway bound, not draining
//!
//! `/metrics` is merged onto the same router in `main`.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Startup and shutdown milestones that gate readiness.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    router_created: AtomicBool,
    gateway_bound: AtomicBool,
    draining: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Live, not yet ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            router_created: AtomicBool::new(false),
            gateway_bound: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    pub fn set_router_created(&self) {
        self.router_created.store(true, Ordering::SeqCst);
    }

    pub fn set_gateway_bound(&self) {
        self.gateway_bound.store(true, Ordering::SeqCst);
    }

    /// Stop reporting ready. Irreversible.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.router_created.load(Ordering::SeqCst)
            && self.gateway_bound.load(Ordering::SeqCst)
            && !self.is_draining()
    }

    /// Why the service is not ready, if it isn't.
    #[must_use]
    pub fn not_ready_reason(&self) -> Option<&'static str> {
        if self.is_draining() {
            Some("draining")
        } else if !self.router_created.load(Ordering::SeqCst) {
            Some("router not created")
        } else if !self.gateway_bound.load(Ordering::SeqCst) {
            Some("gateway not bound")
        } else {
            None
        }
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    match state.not_ready_reason() {
        None => (StatusCode::OK, "ready"),
        Some(reason) => (StatusCode::SERVICE_UNAVAILABLE, reason),
    }
}
