//! Operator session validation.
//!
//! Confirms a terminal's venue/device-bound session is active and
//! unexpired. A session whose duration has elapsed is flipped to expired
//! on detection; the flip is idempotent and last-writer-wins safe, so
//! concurrent detection by several terminals is harmless.

use crate::error::RepositoryError;
use crate::repository::SessionRepository;
use crate::types::{Session, SessionCode};
use chrono::{DateTime, Utc};

/// Outcome of validating a session code.
#[derive(Clone, Debug)]
pub enum SessionOutcome {
    /// Session is active and inside its window; scan may proceed.
    Valid(Session),
    /// Session missing, expired, or past its duration; reject the scan.
    Invalid,
}

/// Validate the session a terminal presented with a scan.
///
/// Missing sessions are invalid. Present-but-stale sessions (status no
/// longer active, or duration elapsed) are flipped to expired before being
/// reported invalid, so the store converges even if the issuance service
/// never sweeps them.
pub async fn validate_session<R>(
    repo: &R,
    code: &SessionCode,
    now: DateTime<Utc>,
) -> Result<SessionOutcome, RepositoryError>
where
    R: SessionRepository + ?Sized,
{
    let Some(session) = repo.find_session(code).await? else {
        tracing::debug!(session_code = %code, "scan presented an unknown session");
        return Ok(SessionOutcome::Invalid);
    };

    if session.is_valid_at(now) {
        return Ok(SessionOutcome::Valid(session));
    }

    repo.expire_session(code).await?;
    tracing::info!(
        session_code = %code,
        started_at = %session.started_at,
        "session expired; terminal must re-authenticate"
    );
    Ok(SessionOutcome::Invalid)
}
