//! Observability for the SFU signaling service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! RTP parameters and ICE credentials are never logged.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sfu_connections_active` | Gauge | none | Live signaling connections |
//! | `sfu_producers_active` | Gauge | none | Sessions currently publishing |
//! | `sfu_signaling_requests_total` | Counter | `request`, `outcome` | Request outcomes |
//! | `sfu_signaling_latency_seconds` | Histogram | `request` | Request handling time |
//! | `sfu_broadcast_dropped_total` | Counter | none | Undeliverable `new-producer` pushes |
//! | `sfu_actor_panics_total` | Counter | `actor_type` | Actor task panics |
//! | `sfu_sessions_released_total` | Counter | none | Sessions torn down |
//! | `sfu_actor_mailbox_depth` | Gauge | `actor_type` | Hub backpressure |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
