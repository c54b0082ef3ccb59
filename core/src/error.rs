//! Reject taxonomy and infrastructure errors.
//!
//! Business-rule failures are values, not errors: every refused scan is a
//! [`RejectReason`] carried inside a normal `RedemptionResult` and written
//! to the ledger. Only infrastructure failures (storage down, lock wait
//! exhausted) travel as `Err` and they never leave partial writes behind.

use crate::types::{TicketCode, TokenId, VenueId};
use thiserror::Error;

/// Why a scan was refused.
///
/// Each reason maps to exactly one ledger reject row and is shown verbatim
/// at the terminal; recovery is always a fresh re-scan, never an internal
/// retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Bad signature, malformed token, or elapsed expiry
    TokenExpired,
    /// Session missing, expired, or not active
    InvalidSession,
    /// This token id already has a successful redemption (replay/fraud)
    AlreadyRedeemed,
    /// Function is restricted to a venue other than the session's
    WrongLocation,
    /// Venue doesn't support the function, or the ticket lacks a matching
    /// entitlement
    WrongFunction,
    /// Counted function with an exhausted balance
    NoRemaining,
    /// Token references a ticket the system doesn't know
    TicketNotFound,
    /// Infrastructure failure; fully rolled back, nothing was consumed
    InternalError,
}

impl RejectReason {
    /// Database / wire string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidSession => "INVALID_SESSION",
            Self::AlreadyRedeemed => "ALREADY_REDEEMED",
            Self::WrongLocation => "WRONG_LOCATION",
            Self::WrongFunction => "WRONG_FUNCTION",
            Self::NoRemaining => "NO_REMAINING",
            Self::TicketNotFound => "TICKET_NOT_FOUND",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parse a reason from its database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TOKEN_EXPIRED" => Some(Self::TokenExpired),
            "INVALID_SESSION" => Some(Self::InvalidSession),
            "ALREADY_REDEEMED" => Some(Self::AlreadyRedeemed),
            "WRONG_LOCATION" => Some(Self::WrongLocation),
            "WRONG_FUNCTION" => Some(Self::WrongFunction),
            "NO_REMAINING" => Some(Self::NoRemaining),
            "TICKET_NOT_FOUND" => Some(Self::TicketNotFound),
            "INTERNAL_ERROR" => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from signed-token verification.
///
/// Verification is pure; none of these variants imply any side effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token doesn't follow the expected container format.
    #[error("scan token is malformed")]
    Malformed,

    /// The signature doesn't match the payload.
    #[error("scan token signature mismatch")]
    BadSignature,

    /// The token parsed and verified but its expiry has elapsed.
    ///
    /// The embedded identifiers are surfaced so a reject row can still be
    /// logged against the ticket.
    #[error("scan token expired for ticket {ticket_code}")]
    Expired {
        /// Ticket the expired token was issued for
        ticket_code: TicketCode,
        /// Token id embedded in the expired token
        token_id: TokenId,
    },
}

/// Errors from the storage contract.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The per-token exclusive lock wasn't acquired within the bounded wait.
    #[error("timed out waiting for the token lock")]
    LockTimeout,

    /// A uniqueness or balance constraint refused the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The backing store failed or is unreachable.
    #[error("storage error: {0}")]
    Database(String),

    /// A stored row couldn't be decoded into a domain value.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Infrastructure failures surfaced by the engine.
///
/// Business rejects never appear here; they are returned inside the
/// `RedemptionResult`. Everything in this enum means the scan decided
/// nothing: the transaction rolled back and no ledger row from it exists.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Storage failed; the scan transaction rolled back completely.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A valid session referenced a venue the store doesn't have.
    #[error("venue {0} is not provisioned")]
    UnknownVenue(VenueId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_round_trips_through_strings() {
        let all = [
            RejectReason::TokenExpired,
            RejectReason::InvalidSession,
            RejectReason::AlreadyRedeemed,
            RejectReason::WrongLocation,
            RejectReason::WrongFunction,
            RejectReason::NoRemaining,
            RejectReason::TicketNotFound,
            RejectReason::InternalError,
        ];
        for reason in all {
            assert_eq!(RejectReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(RejectReason::parse("NOT_A_REASON"), None);
    }

    #[test]
    fn reject_reason_serializes_screaming_snake() {
        let json = serde_json::to_string(&RejectReason::AlreadyRedeemed).unwrap_or_default();
        assert_eq!(json, "\"ALREADY_REDEEMED\"");
    }
}
