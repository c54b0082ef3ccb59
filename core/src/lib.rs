//! # Farepass Core
//!
//! Domain model and redemption engine for the Farepass voucher system.
//!
//! A Farepass ticket bundles several independently redeemable rights
//! (ferry boarding, gift pickup, token-based playground entries, ...).
//! Guests present a signed, rotating scan token at a staffed terminal;
//! this crate decides, atomically, whether that scan is honored.
//!
//! The crate is deliberately I/O-free: storage is reached only through the
//! [`repository`] traits, time only through [`clock::Clock`], and token
//! verification through [`token::TokenVerifier`]. Concrete backends live in
//! `farepass-postgres` (production) and `farepass-testing` (in-memory).
//!
//! ## Modules
//!
//! - [`types`] - Domain types (tickets, sessions, venues, ledger rows)
//! - [`error`] - Reject taxonomy and infrastructure errors
//! - [`token`] - Pure signed-token verification
//! - [`policy`] - Function alias resolution and consumption policies
//! - [`session`] - Operator session validation
//! - [`repository`] - Storage contract (sessions, venues, ledger, balances)
//! - [`engine`] - The redemption engine itself
//!
//! ## Example
//!
//! ```ignore
//! use farepass_core::engine::RedemptionEngine;
//! use farepass_core::types::ScanRequest;
//!
//! async fn scan(engine: &RedemptionEngine) -> anyhow::Result<()> {
//!     let result = engine
//!         .redeem(ScanRequest {
//!             scan_token: raw_token,
//!             function_code: "gift_redemption".into(),
//!             session_code: "SES-20260807-001".into(),
//!             terminal_device_id: "GATE-02".into(),
//!         })
//!         .await?;
//!     println!("{:?} ({:?})", result.result, result.reason);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod policy;
pub mod repository;
pub mod session;
pub mod token;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use engine::RedemptionEngine;
pub use error::{EngineError, RejectReason, RepositoryError, TokenError};
pub use policy::{ConsumptionPolicy, FunctionPolicyResolver};
pub use repository::{LedgerFilter, LedgerPage, RedemptionRepository};
pub use token::{HmacTokenVerifier, TokenVerifier, VerifiedToken};
