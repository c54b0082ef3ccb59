//! Storage contract for the redemption engine.
//!
//! The engine depends only on these traits, never on a concrete storage
//! technology. `farepass-postgres` implements them over sqlx;
//! `farepass-testing` implements them in memory for deterministic tests.
//! There is exactly one implementation surface, no mock-vs-real branching
//! inside the engine.

use crate::error::RepositoryError;
use crate::types::{
    Entitlement, FunctionCode, NewRedemptionEvent, RedemptionEvent, ScanResult, Session,
    SessionCode, TicketCode, TokenId, Venue, VenueId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Default page size for ledger queries.
pub const DEFAULT_QUERY_LIMIT: i64 = 50;

/// Hard cap on ledger query page size.
pub const MAX_QUERY_LIMIT: i64 = 500;

/// Filters for the audit/reporting ledger query.
#[derive(Clone, Debug, Default)]
pub struct LedgerFilter {
    /// Only rows decided at or after this instant
    pub from: Option<DateTime<Utc>>,
    /// Only rows decided before this instant
    pub to: Option<DateTime<Utc>>,
    /// Only rows for this canonical function
    pub function_code: Option<FunctionCode>,
    /// Only rows scanned at this venue
    pub venue_id: Option<VenueId>,
    /// Only rows with this result
    pub result: Option<ScanResult>,
    /// Page size; clamped to [`MAX_QUERY_LIMIT`]
    pub limit: Option<i64>,
    /// Rows to skip
    pub offset: Option<i64>,
}

impl LedgerFilter {
    /// The effective page size after defaulting and clamping.
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    /// The effective offset (never negative).
    #[must_use]
    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// One page of ledger rows, newest first.
#[derive(Clone, Debug)]
pub struct LedgerPage {
    /// The rows of this page
    pub events: Vec<RedemptionEvent>,
    /// Total rows matching the filter across all pages
    pub total: i64,
}

/// Read/expire access to operator sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Look up a session by its code.
    async fn find_session(&self, code: &SessionCode) -> Result<Option<Session>, RepositoryError>;

    /// Idempotently flip a session to expired.
    ///
    /// Safe under races: the transition happens at most once and a lost
    /// write has no correctness impact.
    async fn expire_session(&self, code: &SessionCode) -> Result<(), RepositoryError>;
}

/// Read access to venues.
#[async_trait]
pub trait VenueRepository: Send + Sync {
    /// Look up a venue by id.
    async fn find_venue(&self, id: VenueId) -> Result<Option<Venue>, RepositoryError>;
}

/// The full storage surface the redemption engine requires.
#[async_trait]
pub trait RedemptionRepository: SessionRepository + VenueRepository {
    /// Open the exclusive scan transaction for one token.
    ///
    /// Acquiring the transaction takes a lock scoped to `token_id`: two
    /// concurrent scans of the same token serialize here, while scans of
    /// distinct tokens proceed fully in parallel. The wait is bounded;
    /// exhausting it yields [`RepositoryError::LockTimeout`].
    async fn begin_scan(
        &self,
        token_id: TokenId,
    ) -> Result<Box<dyn ScanTransaction>, RepositoryError>;

    /// Append a ledger row outside any scan transaction.
    ///
    /// Used for rejects decided before the token lock is taken (expired
    /// tokens, invalid sessions). Only reject rows are legal here; success
    /// rows must go through [`ScanTransaction::insert_event`].
    async fn append_event(
        &self,
        event: NewRedemptionEvent,
    ) -> Result<RedemptionEvent, RepositoryError>;

    /// Query the ledger for audit/reporting, newest first.
    async fn query_events(&self, filter: &LedgerFilter) -> Result<LedgerPage, RepositoryError>;

    /// Current entitlement balances for a ticket, or `None` if the ticket
    /// is unknown. Read-only surface for reporting; the transactional read
    /// lives on [`ScanTransaction`].
    async fn load_entitlements(
        &self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, RepositoryError>;

    /// Cheap liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// The atomic unit of work for one scan.
///
/// Everything read and written through this transaction is serialized
/// against other scans of the same token. Dropping the transaction without
/// [`commit`](Self::commit) rolls back every staged write: no partial
/// decrement, no orphan ledger row.
#[async_trait]
pub trait ScanTransaction: Send {
    /// Whether any prior successful event exists for this token id,
    /// regardless of function.
    async fn token_already_redeemed(&mut self, token_id: TokenId)
    -> Result<bool, RepositoryError>;

    /// Whether a prior successful event exists for (ticket, function),
    /// across all token ids. Drives the single-use policy.
    async fn function_already_redeemed(
        &mut self,
        ticket: &TicketCode,
        function: &FunctionCode,
    ) -> Result<bool, RepositoryError>;

    /// Entitlement balances for a ticket, or `None` if the ticket is
    /// unknown.
    async fn load_entitlements(
        &mut self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, RepositoryError>;

    /// Decrement a counted balance, guarded against going negative.
    ///
    /// Returns `false` when the balance was already zero (a concurrent
    /// scan with a different token won the last use).
    async fn decrement_entitlement(
        &mut self,
        ticket: &TicketCode,
        function: &FunctionCode,
    ) -> Result<bool, RepositoryError>;

    /// Insert the ledger row for this scan.
    async fn insert_event(
        &mut self,
        event: NewRedemptionEvent,
    ) -> Result<RedemptionEvent, RepositoryError>;

    /// Commit every staged write atomically and release the token lock.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}
