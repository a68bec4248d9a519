//! Actor model implementation of the signaling coordinator.
//!
//! ```text
//! SignalingHub (singleton per process)
//! ├── directory of live connections + their push queues
//! └── supervises N ConnectionActors
//!     └── ConnectionActor (one per client connection)
//!         └── owns its SessionRegistry entry
//! ```
//!
//! # Key Design Decisions
//!
//! - **Serial per connection**: a connection's requests never interleave; different
//!   connections run concurrently
//! - **Self-scoped writes**: a connection actor only writes its own registry key
//! - **Fire-and-forget fan-out**: the hub queues pushes with `try_send`
//! - **CancellationToken propagation**: the hub hands each connection a child token;
//!   disconnect and shutdown are both cancellation
//!
//! # Modules
//!
//! - [`hub`] - `SignalingHub` supervisor and broadcaster
//! - [`connection`] - `ConnectionActor` per connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics
//! - [`session`] - Idempotent session release

pub mod connection;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod session;

pub use connection::{ConnectionActor, ConnectionActorHandle, SignalingContext};
pub use hub::{SignalingHub, SignalingHubHandle, DEFAULT_SHUTDOWN_DEADLINE};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use session::release_session;
