//! # Session Router Test Utilities
//!
//! Shared test utilities for the session router.
//!
//! This crate provides:
//! - Server test harness (`TestRouterServer`, the real gateway on a random
//!   port backed by a `MockMediaEngine`)
//! - WebSocket client (`WsTestClient`) speaking the signaling protocol
//! - Fixtures for RTP parameters, RTP capabilities and DTLS parameters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sr_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRouterServer::spawn().await?;
//!     let mut client = server.connect().await?;
//!
//!     let joined = client.join("R1", PeerRole::Mentor).await?;
//!     assert_eq!(joined.room_id, "R1");
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use common::PeerRole;
pub use fixtures::*;
pub use server_harness::*;
pub use ws_client::*;
