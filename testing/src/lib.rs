//! # Farepass Testing
//!
//! Testing utilities and in-memory backends for the Farepass workspace.
//!
//! This crate provides:
//! - [`mocks::InMemoryRedemptionRepository`]: a complete in-memory
//!   implementation of the storage contract, with real per-token locking,
//!   so engine behavior (including concurrency) is testable without a
//!   database
//! - [`mocks::FixedClock`]: deterministic time
//! - [`fixtures`]: signed-token helpers and a seeded scenario world
//!
//! ## Example
//!
//! ```ignore
//! use farepass_testing::fixtures::ScenarioWorld;
//!
//! #[tokio::test]
//! async fn gift_pickup_is_single_use() {
//!     let world = ScenarioWorld::seed();
//!     let engine = world.engine();
//!     let result = engine.redeem(world.scan("gift_redemption")).await.unwrap();
//!     assert_eq!(result.result, ScanResult::Success);
//! }
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::ScenarioWorld;
pub use mocks::{FixedClock, InMemoryRedemptionRepository};
