//! Domain types for the Farepass redemption system.
//!
//! This module contains the value objects and entities shared by the
//! redemption engine, the storage backends, and the HTTP surface: tickets
//! and their entitlements, operator sessions, venues, and the immutable
//! redemption ledger rows.

use crate::error::RejectReason;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Printed code identifying a ticket (e.g. `TKT-2026-000481`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketCode(String);

impl TicketCode {
    /// Create a ticket code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TicketCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Code identifying an operator session (issued by the session service).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Create a session code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// A redeemable function code, canonical or product alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionCode(String);

impl FunctionCode {
    /// Create a function code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FunctionCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Short code identifying a venue (e.g. `FERRY_PIER`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueCode(String);

impl VenueCode {
    /// Create a venue code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VenueCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Unique identifier embedded in a signed scan token.
///
/// Rotated whenever a new token is issued for a ticket, so a captured
/// token replay is detectable by this id alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(Uuid);

impl TokenId {
    /// Generate a new random `TokenId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TokenId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a venue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueId(Uuid);

impl VenueId {
    /// Generate a new random `VenueId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `VenueId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VenueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a terminal operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(Uuid);

impl OperatorId {
    /// Generate a new random `OperatorId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OperatorId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a redemption ledger row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a new random `EventId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Venues and sessions
// ============================================================================

/// A staffed venue where tickets are redeemed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Unique venue identifier
    pub id: VenueId,
    /// Short venue code (stable, used in policy restrictions)
    pub code: VenueCode,
    /// Display name shown on terminals
    pub name: String,
    /// Canonical function codes this venue can redeem
    pub supported_functions: Vec<FunctionCode>,
    /// Whether the venue is currently operating
    pub active: bool,
}

impl Venue {
    /// Whether this venue can redeem the given canonical function.
    #[must_use]
    pub fn supports(&self, function: &FunctionCode) -> bool {
        self.supported_functions.contains(function)
    }
}

/// Lifecycle status of an operator session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is open for scanning
    Active,
    /// Session has ended; terminal must re-authenticate
    Expired,
}

impl SessionStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    /// Parse a status from its database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// An operator's authenticated, venue/device-scoped working window.
///
/// Sessions are created by an external issuance flow; the engine only
/// reads them, and only ever mutates the idempotent active → expired
/// transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session code presented by the terminal
    pub code: SessionCode,
    /// Venue this session is bound to
    pub venue_id: VenueId,
    /// Operator running the terminal
    pub operator_id: OperatorId,
    /// Device the session was opened on
    pub device_id: String,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// How long the session stays valid, in seconds
    pub duration_secs: i64,
    /// Current lifecycle status
    pub status: SessionStatus,
}

impl Session {
    /// When this session stops being valid.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at + Duration::seconds(self.duration_secs)
    }

    /// A session is valid iff it is active and its duration has not elapsed.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now < self.expires_at()
    }
}

// ============================================================================
// Entitlements
// ============================================================================

/// A redeemable right on a ticket: one function and its remaining balance.
///
/// Balances never go negative and are only decremented by a successful
/// counted redemption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Canonical function code
    pub function_code: FunctionCode,
    /// Uses left; ignored by unlimited and single-use functions
    pub remaining_uses: i64,
}

/// Whether the ticket referenced by a scan is known to the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Ticket exists and its entitlements were loaded
    Active,
    /// Scan was rejected before the ticket could be established
    Unknown,
}

// ============================================================================
// Redemption ledger
// ============================================================================

/// Outcome of a single scan attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResult {
    /// The right was granted
    Success,
    /// The scan was refused; see the reject reason
    Reject,
}

impl ScanResult {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Reject => "reject",
        }
    }

    /// Parse a result from its database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// One immutable row of the redemption ledger.
///
/// A row is written exactly once per scan attempt and never updated or
/// deleted; the ledger is the audit trail and the source of truth for
/// replay detection and single-use checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    /// Row identifier
    pub id: EventId,
    /// Ticket the scanned token belongs to
    pub ticket_code: TicketCode,
    /// Canonical function that was requested
    pub function_code: FunctionCode,
    /// Venue of the scan, when a valid session established one
    pub venue_id: Option<VenueId>,
    /// Operator of the scan, when a valid session established one
    pub operator_id: Option<OperatorId>,
    /// Session code presented by the terminal (valid or not)
    pub session_code: SessionCode,
    /// Token id embedded in the scanned token
    pub token_id: TokenId,
    /// `"{token_id}:{function_code}"`, set only when `result` is success.
    /// Unique store-wide when non-null.
    pub success_unique_key: Option<String>,
    /// Success or reject
    pub result: ScanResult,
    /// Why a reject was issued; `None` on success
    pub reason: Option<RejectReason>,
    /// Balance after the scan, for counted functions
    pub remaining_uses_after: Option<i64>,
    /// When the scan was decided
    pub redeemed_at: DateTime<Utc>,
}

/// A ledger row about to be inserted.
///
/// The storage backend assigns the [`EventId`]; everything else is decided
/// by the engine before the write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRedemptionEvent {
    /// Ticket the scanned token belongs to
    pub ticket_code: TicketCode,
    /// Canonical function that was requested
    pub function_code: FunctionCode,
    /// Venue of the scan, when known
    pub venue_id: Option<VenueId>,
    /// Operator of the scan, when known
    pub operator_id: Option<OperatorId>,
    /// Session code presented by the terminal
    pub session_code: SessionCode,
    /// Token id embedded in the scanned token
    pub token_id: TokenId,
    /// Success or reject
    pub result: ScanResult,
    /// Why a reject was issued; `None` on success
    pub reason: Option<RejectReason>,
    /// Balance after the scan, for counted functions
    pub remaining_uses_after: Option<i64>,
    /// When the scan was decided
    pub redeemed_at: DateTime<Utc>,
}

impl NewRedemptionEvent {
    /// The store-wide success dedup key, present only on success rows.
    #[must_use]
    pub fn success_unique_key(&self) -> Option<String> {
        match self.result {
            ScanResult::Success => Some(format!("{}:{}", self.token_id, self.function_code)),
            ScanResult::Reject => None,
        }
    }

    /// Materialize the ledger row with its assigned id.
    #[must_use]
    pub fn into_event(self, id: EventId) -> RedemptionEvent {
        let success_unique_key = self.success_unique_key();
        RedemptionEvent {
            id,
            ticket_code: self.ticket_code,
            function_code: self.function_code,
            venue_id: self.venue_id,
            operator_id: self.operator_id,
            session_code: self.session_code,
            token_id: self.token_id,
            success_unique_key,
            result: self.result,
            reason: self.reason,
            remaining_uses_after: self.remaining_uses_after,
            redeemed_at: self.redeemed_at,
        }
    }
}

// ============================================================================
// Scan request / response
// ============================================================================

/// A scan as received from a terminal.
#[derive(Clone, Debug, Deserialize)]
pub struct ScanRequest {
    /// The opaque signed token read from the guest's pass
    pub scan_token: String,
    /// Requested function (canonical or product alias)
    pub function_code: FunctionCode,
    /// The operator session the terminal is running under
    pub session_code: SessionCode,
    /// Terminal hardware identifier
    pub terminal_device_id: String,
}

/// Venue details echoed back to the terminal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueInfo {
    /// Short venue code
    pub venue_code: VenueCode,
    /// Display name
    pub venue_name: String,
    /// The terminal that performed the scan
    pub terminal_device: String,
}

/// Timing and fraud-check telemetry for one scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// End-to-end decision latency in milliseconds
    pub response_time_ms: u64,
    /// Whether the token-level replay check executed and passed
    pub fraud_checks_passed: bool,
}

/// The decision returned to the terminal for one scan.
///
/// Business rejects are carried here (`result` = reject plus a reason),
/// not as errors; only infrastructure failures surface as `Err` from the
/// engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedemptionResult {
    /// Success or reject
    pub result: ScanResult,
    /// Reject reason, when `result` is reject
    pub reason: Option<RejectReason>,
    /// Whether the scanned ticket is known
    pub ticket_status: TicketStatus,
    /// Full entitlement list after the scan, when the ticket was loaded
    pub entitlements: Vec<Entitlement>,
    /// Balance left for the scanned function (counted functions only)
    pub remaining_uses: Option<i64>,
    /// Venue details, when a valid session established them
    pub venue_info: Option<VenueInfo>,
    /// Timing and fraud-check telemetry
    pub performance_metrics: PerformanceMetrics,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
}
