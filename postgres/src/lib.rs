//! `PostgreSQL` storage backend for the Farepass redemption engine.
//!
//! Implements the `farepass-core` repository contract over sqlx with:
//!
//! - A per-token advisory transaction lock (`pg_advisory_xact_lock`) so
//!   concurrent scans of one token serialize while distinct tokens never
//!   contend
//! - Serializable scan transactions with a bounded `lock_timeout`
//! - Partial unique indexes as a database-level backstop for the
//!   one-success-per-token invariant
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use farepass_postgres::{MIGRATOR, PgRedemptionRepository};
//!
//! async fn setup(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     MIGRATOR.run(&pool).await?;
//!     let repo = PgRedemptionRepository::new(pool);
//!     Ok(())
//! }
//! ```

pub mod repository;

pub use repository::PgRedemptionRepository;

/// Embedded schema migrations for the Farepass database.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
