//! sqlx implementation of the Farepass storage contract.

use async_trait::async_trait;
use farepass_core::error::RepositoryError;
use farepass_core::repository::{
    LedgerFilter, LedgerPage, RedemptionRepository, ScanTransaction, SessionRepository,
    VenueRepository,
};
use farepass_core::types::{
    Entitlement, EventId, FunctionCode, NewRedemptionEvent, OperatorId, RedemptionEvent,
    ScanResult, Session, SessionCode, SessionStatus, TicketCode, TokenId, Venue, VenueCode,
    VenueId,
};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{PgPool, QueryBuilder, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

/// Default bounded wait for the per-token advisory lock.
const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(1500);

/// `PostgreSQL`-backed implementation of the full storage contract.
///
/// One instance wraps a connection pool and is shared across all scan
/// workers; every scan gets its own transaction off the pool.
#[derive(Clone)]
pub struct PgRedemptionRepository {
    pool: PgPool,
    lock_wait: Duration,
}

impl PgRedemptionRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Override the bounded advisory-lock wait.
    #[must_use]
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Administrative seeding surface used by provisioning jobs and tests.
    pub async fn seed_venue(&self, venue: &Venue) -> Result<(), RepositoryError> {
        let functions: Vec<String> = venue
            .supported_functions
            .iter()
            .map(|f| f.as_str().to_string())
            .collect();
        sqlx::query(
            "INSERT INTO venues (id, code, name, supported_functions, active)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE
             SET code = $2, name = $3, supported_functions = $4, active = $5",
        )
        .bind(venue.id.as_uuid())
        .bind(venue.code.as_str())
        .bind(&venue.name)
        .bind(&functions)
        .bind(venue.active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Administrative seeding surface used by provisioning jobs and tests.
    pub async fn seed_session(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO operator_sessions
                 (session_code, venue_id, operator_id, device_id, started_at,
                  duration_secs, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (session_code) DO UPDATE
             SET started_at = $5, duration_secs = $6, status = $7",
        )
        .bind(session.code.as_str())
        .bind(session.venue_id.as_uuid())
        .bind(session.operator_id.as_uuid())
        .bind(&session.device_id)
        .bind(session.started_at)
        .bind(session.duration_secs)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Administrative seeding surface used by provisioning jobs and tests.
    pub async fn seed_ticket(
        &self,
        ticket: &TicketCode,
        entitlements: &[Entitlement],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("INSERT INTO tickets (code) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(ticket.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        for entitlement in entitlements {
            sqlx::query(
                "INSERT INTO entitlements (ticket_code, function_code, remaining_uses)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (ticket_code, function_code) DO UPDATE
                 SET remaining_uses = $3",
            )
            .bind(ticket.as_str())
            .bind(entitlement.function_code.as_str())
            .bind(entitlement.remaining_uses)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl SessionRepository for PgRedemptionRepository {
    async fn find_session(&self, code: &SessionCode) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT session_code, venue_id, operator_id, device_id, started_at,
                    duration_secs, status
             FROM operator_sessions
             WHERE session_code = $1",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(session_from_row).transpose()
    }

    async fn expire_session(&self, code: &SessionCode) -> Result<(), RepositoryError> {
        // Idempotent: flips at most once, later writers are no-ops.
        sqlx::query(
            "UPDATE operator_sessions
             SET status = 'expired'
             WHERE session_code = $1 AND status = 'active'",
        )
        .bind(code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl VenueRepository for PgRedemptionRepository {
    async fn find_venue(&self, id: VenueId) -> Result<Option<Venue>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, code, name, supported_functions, active
             FROM venues
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(venue_from_row).transpose()
    }
}

#[async_trait]
impl RedemptionRepository for PgRedemptionRepository {
    #[tracing::instrument(skip(self), fields(token_id = %token_id))]
    async fn begin_scan(
        &self,
        token_id: TokenId,
    ) -> Result<Box<dyn ScanTransaction>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Serializable so the replay check and the final write form one
        // unit against every other scan transaction.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        // Bounded lock wait; exhaustion surfaces as 55P03.
        let lock_timeout_ms = self.lock_wait.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{lock_timeout_ms}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        // Per-token exclusivity. Released automatically at commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(token_id.as_uuid().to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Box::new(PgScanTransaction { tx }))
    }

    async fn append_event(
        &self,
        event: NewRedemptionEvent,
    ) -> Result<RedemptionEvent, RepositoryError> {
        insert_event_on(&self.pool, event).await
    }

    async fn query_events(&self, filter: &LedgerFilter) -> Result<LedgerPage, RepositoryError> {
        let mut count_query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM redemption_events WHERE TRUE");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut page_query: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, ticket_code, function_code, venue_id, operator_id,
                    session_code, token_id, success_unique_key, result, reason,
                    remaining_uses_after, redeemed_at
             FROM redemption_events WHERE TRUE",
        );
        push_filters(&mut page_query, filter);
        page_query.push(" ORDER BY redeemed_at DESC, id DESC LIMIT ");
        page_query.push_bind(filter.effective_limit());
        page_query.push(" OFFSET ");
        page_query.push_bind(filter.effective_offset());

        let rows = page_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let events = rows
            .into_iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LedgerPage { events, total })
    }

    async fn load_entitlements(
        &self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, RepositoryError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        load_entitlements_on(&mut conn, ticket).await
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

/// One scan's transaction: advisory token lock plus every staged write,
/// committed or rolled back as a unit.
struct PgScanTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ScanTransaction for PgScanTransaction {
    async fn token_already_redeemed(
        &mut self,
        token_id: TokenId,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM redemption_events
                 WHERE token_id = $1 AND result = 'success'
             )",
        )
        .bind(token_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(exists)
    }

    async fn function_already_redeemed(
        &mut self,
        ticket: &TicketCode,
        function: &FunctionCode,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM redemption_events
                 WHERE ticket_code = $1 AND function_code = $2 AND result = 'success'
             )",
        )
        .bind(ticket.as_str())
        .bind(function.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(exists)
    }

    async fn load_entitlements(
        &mut self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, RepositoryError> {
        load_entitlements_on(&mut *self.tx, ticket).await
    }

    async fn decrement_entitlement(
        &mut self,
        ticket: &TicketCode,
        function: &FunctionCode,
    ) -> Result<bool, RepositoryError> {
        // Guarded in SQL: the balance can never go negative, and losing a
        // last-use race with another token reports `false`, not an error.
        let result = sqlx::query(
            "UPDATE entitlements
             SET remaining_uses = remaining_uses - 1
             WHERE ticket_code = $1 AND function_code = $2 AND remaining_uses > 0",
        )
        .bind(ticket.as_str())
        .bind(function.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_event(
        &mut self,
        event: NewRedemptionEvent,
    ) -> Result<RedemptionEvent, RepositoryError> {
        insert_event_on(&mut *self.tx, event).await
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}

/// Insert a ledger row on any executor (pool for pre-lock rejects,
/// transaction for everything inside the exclusive region).
async fn insert_event_on<'e, E>(
    executor: E,
    event: NewRedemptionEvent,
) -> Result<RedemptionEvent, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let event = event.into_event(EventId::new());
    sqlx::query(
        "INSERT INTO redemption_events
             (id, ticket_code, function_code, venue_id, operator_id,
              session_code, token_id, success_unique_key, result, reason,
              remaining_uses_after, redeemed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(event.id.as_uuid())
    .bind(event.ticket_code.as_str())
    .bind(event.function_code.as_str())
    .bind(event.venue_id.map(|v| *v.as_uuid()))
    .bind(event.operator_id.map(|o| *o.as_uuid()))
    .bind(event.session_code.as_str())
    .bind(event.token_id.as_uuid())
    .bind(event.success_unique_key.clone())
    .bind(event.result.as_str())
    .bind(event.reason.map(|r| r.as_str()))
    .bind(event.remaining_uses_after)
    .bind(event.redeemed_at)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(event)
}

/// Load a ticket's balances over one connection, `None` when the ticket
/// is unknown.
async fn load_entitlements_on(
    conn: &mut sqlx::PgConnection,
    ticket: &TicketCode,
) -> Result<Option<Vec<Entitlement>>, RepositoryError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tickets WHERE code = $1)")
        .bind(ticket.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if !exists {
        return Ok(None);
    }

    let rows = sqlx::query(
        "SELECT function_code, remaining_uses
         FROM entitlements
         WHERE ticket_code = $1
         ORDER BY function_code",
    )
    .bind(ticket.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    let entitlements = rows
        .into_iter()
        .map(|row| {
            Ok(Entitlement {
                function_code: FunctionCode::new(
                    row.try_get::<String, _>("function_code")
                        .map_err(map_sqlx_error)?,
                ),
                remaining_uses: row.try_get("remaining_uses").map_err(map_sqlx_error)?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;
    Ok(Some(entitlements))
}

/// Append the filter clauses shared by the count and page queries.
fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &LedgerFilter) {
    if let Some(from) = filter.from {
        query.push(" AND redeemed_at >= ");
        query.push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND redeemed_at < ");
        query.push_bind(to);
    }
    if let Some(function) = &filter.function_code {
        query.push(" AND function_code = ");
        query.push_bind(function.as_str().to_string());
    }
    if let Some(venue_id) = filter.venue_id {
        query.push(" AND venue_id = ");
        query.push_bind(*venue_id.as_uuid());
    }
    if let Some(result) = filter.result {
        query.push(" AND result = ");
        query.push_bind(result.as_str());
    }
}

fn session_from_row(row: PgRow) -> Result<Session, RepositoryError> {
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let status = SessionStatus::parse(&status)
        .ok_or_else(|| RepositoryError::CorruptRow(format!("session status `{status}`")))?;
    Ok(Session {
        code: SessionCode::new(
            row.try_get::<String, _>("session_code")
                .map_err(map_sqlx_error)?,
        ),
        venue_id: VenueId::from_uuid(row.try_get("venue_id").map_err(map_sqlx_error)?),
        operator_id: OperatorId::from_uuid(row.try_get("operator_id").map_err(map_sqlx_error)?),
        device_id: row.try_get("device_id").map_err(map_sqlx_error)?,
        started_at: row.try_get("started_at").map_err(map_sqlx_error)?,
        duration_secs: row.try_get("duration_secs").map_err(map_sqlx_error)?,
        status,
    })
}

fn venue_from_row(row: PgRow) -> Result<Venue, RepositoryError> {
    let functions: Vec<String> = row
        .try_get("supported_functions")
        .map_err(map_sqlx_error)?;
    Ok(Venue {
        id: VenueId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        code: VenueCode::new(row.try_get::<String, _>("code").map_err(map_sqlx_error)?),
        name: row.try_get("name").map_err(map_sqlx_error)?,
        supported_functions: functions.into_iter().map(FunctionCode::new).collect(),
        active: row.try_get("active").map_err(map_sqlx_error)?,
    })
}

fn event_from_row(row: PgRow) -> Result<RedemptionEvent, RepositoryError> {
    let result: String = row.try_get("result").map_err(map_sqlx_error)?;
    let result = ScanResult::parse(&result)
        .ok_or_else(|| RepositoryError::CorruptRow(format!("scan result `{result}`")))?;
    let reason: Option<String> = row.try_get("reason").map_err(map_sqlx_error)?;
    let reason = reason
        .map(|r| {
            farepass_core::error::RejectReason::parse(&r)
                .ok_or_else(|| RepositoryError::CorruptRow(format!("reject reason `{r}`")))
        })
        .transpose()?;
    Ok(RedemptionEvent {
        id: EventId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        ticket_code: TicketCode::new(
            row.try_get::<String, _>("ticket_code")
                .map_err(map_sqlx_error)?,
        ),
        function_code: FunctionCode::new(
            row.try_get::<String, _>("function_code")
                .map_err(map_sqlx_error)?,
        ),
        venue_id: row
            .try_get::<Option<Uuid>, _>("venue_id")
            .map_err(map_sqlx_error)?
            .map(VenueId::from_uuid),
        operator_id: row
            .try_get::<Option<Uuid>, _>("operator_id")
            .map_err(map_sqlx_error)?
            .map(OperatorId::from_uuid),
        session_code: SessionCode::new(
            row.try_get::<String, _>("session_code")
                .map_err(map_sqlx_error)?,
        ),
        token_id: TokenId::from_uuid(row.try_get("token_id").map_err(map_sqlx_error)?),
        success_unique_key: row.try_get("success_unique_key").map_err(map_sqlx_error)?,
        result,
        reason,
        remaining_uses_after: row
            .try_get("remaining_uses_after")
            .map_err(map_sqlx_error)?,
        redeemed_at: row.try_get("redeemed_at").map_err(map_sqlx_error)?,
    })
}

/// Map sqlx failures onto the storage error taxonomy.
fn map_sqlx_error(error: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            // lock_not_available: the bounded advisory-lock wait expired
            Some("55P03") => return RepositoryError::LockTimeout,
            // unique/check violation, or a serialization conflict under
            // SERIALIZABLE: the invariants refused the write
            Some("23505" | "23514" | "40001") => {
                return RepositoryError::Constraint(db_error.message().to_string());
            }
            _ => {}
        }
    }
    RepositoryError::Database(error.to_string())
}
