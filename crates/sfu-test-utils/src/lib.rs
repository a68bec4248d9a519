//! # SFU Test Utilities
//!
//! Shared test utilities for the SFU signaling service.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable `MediaEngine` with call counters
//! - `fixtures` - RTP parameters, capabilities and signaling contexts
//! - `test_peer` - A connected client that records its pushes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockEngine::builder().reject_consume().build();
//!     let (hub, _ctx) = spawn_hub(engine.clone()).await;
//!
//!     let mut alice = TestPeer::connect(&hub).await;
//!     alice.create_transport().await;
//!     let producer_id = alice.produce_video().await;
//!
//!     // Run your test...
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod test_peer;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_engine::*;
pub use test_peer::*;
