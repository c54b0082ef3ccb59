//! Redemption API endpoints.
//!
//! - `POST /api/redemptions` - decide one scan
//! - `GET /api/redemptions` - paginated audit query, newest first
//!
//! A scan's business outcome (success or reject) is always a `200 OK`
//! with the decision in the body; the terminal renders the reason code.
//! Only infrastructure failures become HTTP errors, and the engine has
//! already rolled back by the time they surface.

use crate::error::AppError;
use crate::extractors::CorrelationId;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use farepass_core::repository::LedgerFilter;
use farepass_core::types::{
    FunctionCode, RedemptionEvent, RedemptionResult, ScanRequest, ScanResult, VenueId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decide one scan.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/redemptions \
///   -H "Content-Type: application/json" \
///   -d '{
///     "scan_token": "FP1.eyJ0aWNrZXRfY29kZSI6...",
///     "function_code": "gift_redemption",
///     "session_code": "SES-PIER-01",
///     "terminal_device_id": "GATE-02"
///   }'
/// ```
pub async fn redeem(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Json(request): Json<ScanRequest>,
) -> Result<Json<RedemptionResult>, AppError> {
    tracing::debug!(
        correlation_id = %correlation_id.0,
        function = %request.function_code,
        terminal = %request.terminal_device_id,
        "scan received"
    );
    let result = state.engine.redeem(request).await?;
    Ok(Json(result))
}

/// Query parameters for the audit ledger.
#[derive(Debug, Deserialize)]
pub struct LedgerQueryParams {
    /// Only rows decided at or after this instant (RFC 3339)
    pub from: Option<DateTime<Utc>>,
    /// Only rows decided before this instant (RFC 3339)
    pub to: Option<DateTime<Utc>>,
    /// Only rows for this canonical function
    pub function_code: Option<String>,
    /// Only rows scanned at this venue
    pub venue_id: Option<Uuid>,
    /// `success` or `reject`
    pub result: Option<String>,
    /// Page size (default 50, max 500)
    pub limit: Option<i64>,
    /// Rows to skip
    pub offset: Option<i64>,
}

/// One page of ledger rows.
#[derive(Debug, Serialize)]
pub struct LedgerPageResponse {
    /// Matching rows, newest first
    pub events: Vec<RedemptionEvent>,
    /// Total matching rows across all pages
    pub total: i64,
}

/// Query the redemption ledger, newest first.
///
/// # Example
///
/// ```bash
/// curl "http://localhost:8080/api/redemptions?result=reject&limit=20"
/// ```
pub async fn query_redemptions(
    State(state): State<AppState>,
    Query(params): Query<LedgerQueryParams>,
) -> Result<Json<LedgerPageResponse>, AppError> {
    let result = params
        .result
        .as_deref()
        .map(|raw| {
            ScanResult::parse(raw)
                .ok_or_else(|| AppError::bad_request(format!("unknown result filter `{raw}`")))
        })
        .transpose()?;

    let filter = LedgerFilter {
        from: params.from,
        to: params.to,
        function_code: params.function_code.map(FunctionCode::new),
        venue_id: params.venue_id.map(VenueId::from_uuid),
        result,
        limit: params.limit,
        offset: params.offset,
    };

    let page = state.engine.query_events(&filter).await?;
    Ok(Json(LedgerPageResponse {
        events: page.events,
        total: page.total,
    }))
}
