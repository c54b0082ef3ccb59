//! The redemption engine.
//!
//! Composes token verification, session validation, policy resolution, and
//! the ledger into one atomic decision per scan. The only blocking region
//! is the per-token scan transaction: concurrent scans of the same token
//! serialize on it and at most one can ever commit a success, while scans
//! of distinct tokens never contend.
//!
//! The engine never retries. Every business reject writes exactly one
//! ledger row and returns immediately; a human re-scans. Infrastructure
//! failures roll back the whole transaction and surface as errors with no
//! ledger side effect.

use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, RejectReason, TokenError};
use crate::policy::{ConsumptionPolicy, FunctionPolicyResolver, ResolvedFunction};
use crate::repository::{LedgerFilter, LedgerPage, RedemptionRepository, ScanTransaction};
use crate::session::{SessionOutcome, validate_session};
use crate::token::TokenVerifier;
use crate::types::{
    Entitlement, FunctionCode, NewRedemptionEvent, PerformanceMetrics, RedemptionResult,
    ScanRequest, ScanResult, Session, TicketCode, TicketStatus, TokenId, VenueInfo,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Orchestrates one atomic redemption decision per scan.
///
/// Cheap to clone; all components sit behind `Arc`.
#[derive(Clone)]
pub struct RedemptionEngine {
    repo: Arc<dyn RedemptionRepository>,
    verifier: Arc<dyn TokenVerifier>,
    clock: Arc<dyn Clock>,
    resolver: FunctionPolicyResolver,
}

impl RedemptionEngine {
    /// Create an engine over a repository and token verifier, with the
    /// system clock and the built-in policy catalog.
    #[must_use]
    pub fn new(repo: Arc<dyn RedemptionRepository>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            repo,
            verifier,
            clock: Arc::new(SystemClock),
            resolver: FunctionPolicyResolver::new(),
        }
    }

    /// Replace the clock (deterministic tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the policy resolver (deployment-specific catalogs).
    #[must_use]
    pub fn with_resolver(mut self, resolver: FunctionPolicyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Decide one scan.
    ///
    /// Returns `Ok` for successes and for every business reject; the
    /// distinction lives in the result payload. Returns `Err` only for
    /// infrastructure failures, after a full rollback.
    ///
    /// # Errors
    ///
    /// [`EngineError`] when storage fails or the token lock wait is
    /// exhausted; nothing was written in that case.
    pub async fn redeem(&self, request: ScanRequest) -> Result<RedemptionResult, EngineError> {
        let outcome = self.redeem_inner(request).await;
        match &outcome {
            Ok(result) => {
                let reason = result
                    .reason
                    .map_or_else(|| "none".to_string(), |r| r.as_str().to_string());
                metrics::counter!(
                    "redemptions_total",
                    "result" => result.result.as_str(),
                    "reason" => reason
                )
                .increment(1);
                metrics::histogram!("redemption_duration_ms")
                    .record(result.performance_metrics.response_time_ms as f64);
            }
            Err(error) => {
                metrics::counter!(
                    "redemptions_total",
                    "result" => "error",
                    "reason" => RejectReason::InternalError.as_str()
                )
                .increment(1);
                tracing::error!(error = %error, "scan failed on infrastructure, rolled back");
            }
        }
        outcome
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            function = %request.function_code,
            session = %request.session_code,
            terminal = %request.terminal_device_id,
        )
    )]
    async fn redeem_inner(&self, request: ScanRequest) -> Result<RedemptionResult, EngineError> {
        let started = Instant::now();
        let now = self.clock.now();
        let resolved = self.resolver.resolve(&request.function_code);

        // 1. Verify the token. Pure, outside the critical section.
        let token = match self.verifier.verify(&request.scan_token, now) {
            Ok(token) => token,
            Err(TokenError::Expired {
                ticket_code,
                token_id,
            }) => {
                // Authentic but stale: enough was recovered to log the reject.
                self.repo
                    .append_event(reject_row(
                        &ticket_code,
                        token_id,
                        &resolved,
                        &request,
                        None,
                        RejectReason::TokenExpired,
                        None,
                        now,
                    ))
                    .await?;
                return Ok(self.reject(
                    RejectReason::TokenExpired,
                    TicketStatus::Unknown,
                    Vec::new(),
                    None,
                    None,
                    false,
                    started,
                    now,
                ));
            }
            Err(error) => {
                // Malformed or forged: nothing durable to key a ledger row on.
                tracing::warn!(error = %error, "scan token refused");
                return Ok(self.reject(
                    RejectReason::TokenExpired,
                    TicketStatus::Unknown,
                    Vec::new(),
                    None,
                    None,
                    false,
                    started,
                    now,
                ));
            }
        };

        // 2. Validate the operator session.
        let session =
            match validate_session(self.repo.as_ref(), &request.session_code, now).await? {
                SessionOutcome::Valid(session) => session,
                SessionOutcome::Invalid => {
                    self.repo
                        .append_event(reject_row(
                            &token.ticket_code,
                            token.token_id,
                            &resolved,
                            &request,
                            None,
                            RejectReason::InvalidSession,
                            None,
                            now,
                        ))
                        .await?;
                    return Ok(self.reject(
                        RejectReason::InvalidSession,
                        TicketStatus::Unknown,
                        Vec::new(),
                        None,
                        None,
                        false,
                        started,
                        now,
                    ));
                }
            };

        // 3. Enter the exclusive region for this token and run the fraud
        //    check. The lock is the sole ordering authority: whichever
        //    concurrent scan commits first wins, the loser observes the
        //    winner's row here.
        let mut tx = self.repo.begin_scan(token.token_id).await?;
        if tx.token_already_redeemed(token.token_id).await? {
            tracing::warn!(
                token_id = %token.token_id,
                ticket = %token.ticket_code,
                "replayed token refused"
            );
            let row = reject_row(
                &token.ticket_code,
                token.token_id,
                &resolved,
                &request,
                Some(&session),
                RejectReason::AlreadyRedeemed,
                None,
                now,
            );
            return self
                .commit_reject(tx, row, TicketStatus::Unknown, Vec::new(), None, None, false, started, now)
                .await;
        }
        // Token-level replay check executed and passed.
        let fraud_checks_passed = true;

        // 4. Resolve venue and check the function fits this location.
        let venue = self
            .repo
            .find_venue(session.venue_id)
            .await?
            .ok_or(EngineError::UnknownVenue(session.venue_id))?;
        let venue_info = VenueInfo {
            venue_code: venue.code.clone(),
            venue_name: venue.name.clone(),
            terminal_device: request.terminal_device_id.clone(),
        };

        let venue_mismatch = resolved
            .restricted_venue
            .as_ref()
            .is_some_and(|required| *required != venue.code);
        if venue_mismatch {
            let row = reject_row(
                &token.ticket_code,
                token.token_id,
                &resolved,
                &request,
                Some(&session),
                RejectReason::WrongLocation,
                None,
                now,
            );
            return self
                .commit_reject(
                    tx,
                    row,
                    TicketStatus::Unknown,
                    Vec::new(),
                    None,
                    Some(venue_info),
                    fraud_checks_passed,
                    started,
                    now,
                )
                .await;
        }

        if !venue.active || !venue.supports(&resolved.canonical) {
            let row = reject_row(
                &token.ticket_code,
                token.token_id,
                &resolved,
                &request,
                Some(&session),
                RejectReason::WrongFunction,
                None,
                now,
            );
            return self
                .commit_reject(
                    tx,
                    row,
                    TicketStatus::Unknown,
                    Vec::new(),
                    None,
                    Some(venue_info),
                    fraud_checks_passed,
                    started,
                    now,
                )
                .await;
        }

        // 5. Load the ticket's entitlements.
        let Some(entitlements) = tx.load_entitlements(&token.ticket_code).await? else {
            let row = reject_row(
                &token.ticket_code,
                token.token_id,
                &resolved,
                &request,
                Some(&session),
                RejectReason::TicketNotFound,
                None,
                now,
            );
            return self
                .commit_reject(
                    tx,
                    row,
                    TicketStatus::Unknown,
                    Vec::new(),
                    None,
                    Some(venue_info),
                    fraud_checks_passed,
                    started,
                    now,
                )
                .await;
        };

        let Some(entitlement) = entitlements
            .iter()
            .find(|e| e.function_code == resolved.canonical)
            .cloned()
        else {
            let row = reject_row(
                &token.ticket_code,
                token.token_id,
                &resolved,
                &request,
                Some(&session),
                RejectReason::WrongFunction,
                None,
                now,
            );
            return self
                .commit_reject(
                    tx,
                    row,
                    TicketStatus::Active,
                    entitlements,
                    None,
                    Some(venue_info),
                    fraud_checks_passed,
                    started,
                    now,
                )
                .await;
        };

        // 6. Apply the consumption policy.
        let (must_decrement, remaining_after) = match resolved.policy {
            ConsumptionPolicy::Unlimited => (false, None),
            ConsumptionPolicy::SingleUse => {
                if tx
                    .function_already_redeemed(&token.ticket_code, &resolved.canonical)
                    .await?
                {
                    let row = reject_row(
                        &token.ticket_code,
                        token.token_id,
                        &resolved,
                        &request,
                        Some(&session),
                        RejectReason::AlreadyRedeemed,
                        None,
                        now,
                    );
                    return self
                        .commit_reject(
                            tx,
                            row,
                            TicketStatus::Active,
                            entitlements,
                            None,
                            Some(venue_info),
                            fraud_checks_passed,
                            started,
                            now,
                        )
                        .await;
                }
                (false, None)
            }
            ConsumptionPolicy::Counted => {
                if entitlement.remaining_uses <= 0 {
                    let row = reject_row(
                        &token.ticket_code,
                        token.token_id,
                        &resolved,
                        &request,
                        Some(&session),
                        RejectReason::NoRemaining,
                        Some(0),
                        now,
                    );
                    return self
                        .commit_reject(
                            tx,
                            row,
                            TicketStatus::Active,
                            entitlements,
                            Some(0),
                            Some(venue_info),
                            fraud_checks_passed,
                            started,
                            now,
                        )
                        .await;
                }
                (true, Some(entitlement.remaining_uses - 1))
            }
        };

        // 7. Stage the writes and commit atomically.
        if must_decrement {
            let decremented = tx
                .decrement_entitlement(&token.ticket_code, &resolved.canonical)
                .await?;
            if !decremented {
                // A scan with a different token for the same ticket took the
                // last use between our read and the guarded update.
                let row = reject_row(
                    &token.ticket_code,
                    token.token_id,
                    &resolved,
                    &request,
                    Some(&session),
                    RejectReason::NoRemaining,
                    Some(0),
                    now,
                );
                return self
                    .commit_reject(
                        tx,
                        row,
                        TicketStatus::Active,
                        zero_out(entitlements, &resolved.canonical),
                        Some(0),
                        Some(venue_info),
                        fraud_checks_passed,
                        started,
                        now,
                    )
                    .await;
            }
        }

        tx.insert_event(NewRedemptionEvent {
            ticket_code: token.ticket_code.clone(),
            function_code: resolved.canonical.clone(),
            venue_id: Some(session.venue_id),
            operator_id: Some(session.operator_id),
            session_code: request.session_code.clone(),
            token_id: token.token_id,
            result: ScanResult::Success,
            reason: None,
            remaining_uses_after: remaining_after,
            redeemed_at: now,
        })
        .await?;
        tx.commit().await?;

        tracing::info!(
            ticket = %token.ticket_code,
            function = %resolved.canonical,
            token_id = %token.token_id,
            policy = resolved.policy.as_str(),
            "redemption granted"
        );

        // 8. Respond with the updated balances.
        let updated = if must_decrement {
            decrement_local(entitlements, &resolved.canonical)
        } else {
            entitlements
        };
        Ok(RedemptionResult {
            result: ScanResult::Success,
            reason: None,
            ticket_status: TicketStatus::Active,
            entitlements: updated,
            remaining_uses: remaining_after,
            venue_info: Some(venue_info),
            performance_metrics: PerformanceMetrics {
                response_time_ms: elapsed_ms(started),
                fraud_checks_passed,
            },
            timestamp: now,
        })
    }

    /// Query the redemption ledger for audit/reporting, newest first.
    ///
    /// # Errors
    ///
    /// [`EngineError::Repository`] when the store fails.
    pub async fn query_events(&self, filter: &LedgerFilter) -> Result<LedgerPage, EngineError> {
        Ok(self.repo.query_events(filter).await?)
    }

    /// Current entitlement balances for a ticket, or `None` if unknown.
    ///
    /// # Errors
    ///
    /// [`EngineError::Repository`] when the store fails.
    pub async fn ticket_entitlements(
        &self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, EngineError> {
        Ok(self.repo.load_entitlements(ticket).await?)
    }

    /// Liveness of the backing store, for readiness probes.
    ///
    /// # Errors
    ///
    /// [`EngineError::Repository`] when the store is unreachable.
    pub async fn ping(&self) -> Result<(), EngineError> {
        Ok(self.repo.ping().await?)
    }

    /// Insert a reject row inside the scan transaction, commit, and build
    /// the terminal-facing result.
    #[allow(clippy::too_many_arguments)]
    async fn commit_reject(
        &self,
        mut tx: Box<dyn ScanTransaction>,
        row: NewRedemptionEvent,
        ticket_status: TicketStatus,
        entitlements: Vec<Entitlement>,
        remaining_uses: Option<i64>,
        venue_info: Option<VenueInfo>,
        fraud_checks_passed: bool,
        started: Instant,
        now: DateTime<Utc>,
    ) -> Result<RedemptionResult, EngineError> {
        let reason = row.reason.unwrap_or(RejectReason::InternalError);
        tx.insert_event(row).await?;
        tx.commit().await?;
        Ok(self.reject(
            reason,
            ticket_status,
            entitlements,
            remaining_uses,
            venue_info,
            fraud_checks_passed,
            started,
            now,
        ))
    }

    /// Build a reject result payload.
    #[allow(clippy::too_many_arguments, clippy::unused_self)]
    fn reject(
        &self,
        reason: RejectReason,
        ticket_status: TicketStatus,
        entitlements: Vec<Entitlement>,
        remaining_uses: Option<i64>,
        venue_info: Option<VenueInfo>,
        fraud_checks_passed: bool,
        started: Instant,
        now: DateTime<Utc>,
    ) -> RedemptionResult {
        tracing::info!(reason = %reason, "scan rejected");
        RedemptionResult {
            result: ScanResult::Reject,
            reason: Some(reason),
            ticket_status,
            entitlements,
            remaining_uses,
            venue_info,
            performance_metrics: PerformanceMetrics {
                response_time_ms: elapsed_ms(started),
                fraud_checks_passed,
            },
            timestamp: now,
        }
    }
}

/// Build a reject ledger row.
#[allow(clippy::too_many_arguments)]
fn reject_row(
    ticket_code: &TicketCode,
    token_id: TokenId,
    resolved: &ResolvedFunction,
    request: &ScanRequest,
    session: Option<&Session>,
    reason: RejectReason,
    remaining_uses_after: Option<i64>,
    now: DateTime<Utc>,
) -> NewRedemptionEvent {
    NewRedemptionEvent {
        ticket_code: ticket_code.clone(),
        function_code: resolved.canonical.clone(),
        venue_id: session.map(|s| s.venue_id),
        operator_id: session.map(|s| s.operator_id),
        session_code: request.session_code.clone(),
        token_id,
        result: ScanResult::Reject,
        reason: Some(reason),
        remaining_uses_after,
        redeemed_at: now,
    }
}

/// Apply the committed decrement to the locally held balance list.
fn decrement_local(mut entitlements: Vec<Entitlement>, function: &FunctionCode) -> Vec<Entitlement> {
    for entitlement in &mut entitlements {
        if entitlement.function_code == *function && entitlement.remaining_uses > 0 {
            entitlement.remaining_uses -= 1;
        }
    }
    entitlements
}

/// Reflect a lost last-use race in the locally held balance list.
fn zero_out(mut entitlements: Vec<Entitlement>, function: &FunctionCode) -> Vec<Entitlement> {
    for entitlement in &mut entitlements {
        if entitlement.function_code == *function {
            entitlement.remaining_uses = 0;
        }
    }
    entitlements
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
