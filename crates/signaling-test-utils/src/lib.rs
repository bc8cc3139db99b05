//! # Signaling Test Utilities
//!
//! Shared test utilities for the signaling service.
//!
//! This crate provides:
//! - Server test harness (`TestSignalingServer` for E2E tests)
//! - WebSocket test client (`TestClient`) speaking the JSON protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestSignalingServer::spawn().await?;
//!     let mut alice = TestClient::connect(&server).await?;
//!
//!     let joined = alice.join("room_1", "Alice").await?;
//!     assert!(joined.members.is_empty());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod server_harness;

// Re-export commonly used items
pub use client::*;
pub use server_harness::*;
