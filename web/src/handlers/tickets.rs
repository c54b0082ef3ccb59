//! Ticket balance lookup.
//!
//! Read-only view over the entitlement store as the engine sees it, for
//! terminal "check balance" screens and support tooling.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use farepass_core::types::{Entitlement, TicketCode};
use serde::Serialize;

/// Balance response for one ticket.
#[derive(Debug, Serialize)]
pub struct TicketEntitlementsResponse {
    /// The ticket queried
    pub ticket_code: TicketCode,
    /// Current balances per function
    pub entitlements: Vec<Entitlement>,
}

/// Current entitlement balances for a ticket.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/api/tickets/TKT-0001/entitlements
/// ```
pub async fn get_ticket_entitlements(
    State(state): State<AppState>,
    Path(ticket_code): Path<String>,
) -> Result<Json<TicketEntitlementsResponse>, AppError> {
    let ticket = TicketCode::new(ticket_code);
    let entitlements = state
        .engine
        .ticket_entitlements(&ticket)
        .await?
        .ok_or_else(|| AppError::not_found("ticket", &ticket))?;
    Ok(Json(TicketEntitlementsResponse {
        ticket_code: ticket,
        entitlements,
    }))
}
