//! # Farepass Web
//!
//! Axum HTTP surface for the Farepass redemption engine.
//!
//! The handlers are deliberately thin: they parse the request, call the
//! engine, and serialize the result. Business rejects travel inside a
//! `200 OK` payload (the terminal decides how to present the reason);
//! only infrastructure failures become HTTP errors.
//!
//! ## Endpoints
//!
//! - `POST /api/redemptions` - decide one scan
//! - `GET /api/redemptions` - paginated audit query over the ledger
//! - `GET /api/tickets/:ticket_code/entitlements` - current balances
//! - `GET /health`, `GET /ready` - liveness and readiness

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
