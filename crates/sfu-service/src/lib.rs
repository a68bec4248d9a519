//! SFU Signaling Service Library
//!
//! Signaling layer of a Selective Forwarding Unit: clients negotiate WebRTC
//! transports, publish one media stream, and subscribe to streams published
//! by other participants. The media plane itself lives behind the
//! [`engine::MediaEngine`] trait.
//!
//! # Architecture
//!
//! ```text
//! gateway (WebSocket, one task per socket)
//!     │
//!     ▼
//! SignalingHub (singleton)
//! ├── fans out new-producer pushes
//! └── supervises N ConnectionActors
//!     └── ConnectionActor ──► MediaEngine
//!                        └──► SessionRegistry (own entry only)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Hub and per-connection actors
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Media engine abstraction and the in-process engine
//! - [`errors`] - Error types and client-safe messages
//! - [`gateway`] - WebSocket endpoint and frame protocol
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`registry`] - Per-connection session state

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod registry;
