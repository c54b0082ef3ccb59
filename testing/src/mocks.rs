//! In-memory implementations of the storage contract and clock.
//!
//! The repository here is not a stub: it takes real per-token locks and
//! enforces the ledger's uniqueness invariants, so the engine's
//! concurrency behavior can be exercised deterministically in tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use farepass_core::clock::Clock;
use farepass_core::error::RepositoryError;
use farepass_core::repository::{
    LedgerFilter, LedgerPage, RedemptionRepository, ScanTransaction, SessionRepository,
    VenueRepository,
};
use farepass_core::types::{
    Entitlement, FunctionCode, NewRedemptionEvent, RedemptionEvent, ScanResult, Session,
    SessionCode, SessionStatus, TicketCode, TokenId, Venue, VenueId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Fixed clock for deterministic tests.
///
/// Always returns the time it was last set to, making session windows and
/// token expiry reproducible.
#[derive(Debug)]
pub struct FixedClock {
    now: StdMutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock pinned to `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.now) = now;
    }

    /// Advance the clock.
    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = lock(&self.now);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Everything the in-memory store holds.
#[derive(Default)]
struct StoreState {
    venues: HashMap<VenueId, Venue>,
    sessions: HashMap<String, Session>,
    tickets: HashMap<String, Vec<Entitlement>>,
    events: Vec<RedemptionEvent>,
}

/// In-memory implementation of the full storage contract.
///
/// Scan transactions hold a per-token `tokio` mutex for their lifetime, so
/// concurrent scans of the same token serialize exactly as they do against
/// the production store, while distinct tokens never contend. Balance
/// decrements apply immediately with an undo log; ledger inserts stage and
/// apply on commit, re-checked against the success-uniqueness invariants.
pub struct InMemoryRedemptionRepository {
    state: Arc<StdMutex<StoreState>>,
    token_locks: StdMutex<HashMap<TokenId, Arc<AsyncMutex<()>>>>,
    lock_wait: Duration,
    unavailable: AtomicBool,
}

impl Default for InMemoryRedemptionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRedemptionRepository {
    /// Empty store with a 2 second lock wait.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(StdMutex::new(StoreState::default())),
            token_locks: StdMutex::new(HashMap::new()),
            lock_wait: Duration::from_secs(2),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Override the bounded lock wait (e.g. zero, to force timeouts).
    #[must_use]
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    /// Seed a venue.
    pub fn insert_venue(&self, venue: Venue) {
        lock(&self.state).venues.insert(venue.id, venue);
    }

    /// Seed a session.
    pub fn insert_session(&self, session: Session) {
        lock(&self.state)
            .sessions
            .insert(session.code.as_str().to_string(), session);
    }

    /// Seed a ticket with its entitlements.
    pub fn insert_ticket(&self, code: &TicketCode, entitlements: Vec<Entitlement>) {
        lock(&self.state)
            .tickets
            .insert(code.as_str().to_string(), entitlements);
    }

    /// Snapshot of every ledger row, in insertion order.
    #[must_use]
    pub fn events_snapshot(&self) -> Vec<RedemptionEvent> {
        lock(&self.state).events.clone()
    }

    /// Count successful ledger rows for one token id.
    #[must_use]
    pub fn success_count_for_token(&self, token_id: TokenId) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|e| e.token_id == token_id && e.result == ScanResult::Success)
            .count()
    }

    /// Read back a seeded session (post-expiry assertions).
    #[must_use]
    pub fn session_snapshot(&self, code: &SessionCode) -> Option<Session> {
        lock(&self.state).sessions.get(code.as_str()).cloned()
    }

    /// Make every subsequent storage call fail (infrastructure-outage
    /// tests).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(
                "store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn token_lock(&self, token_id: TokenId) -> Arc<AsyncMutex<()>> {
        lock(&self.token_locks)
            .entry(token_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl SessionRepository for InMemoryRedemptionRepository {
    async fn find_session(&self, code: &SessionCode) -> Result<Option<Session>, RepositoryError> {
        self.check_available()?;
        Ok(lock(&self.state).sessions.get(code.as_str()).cloned())
    }

    async fn expire_session(&self, code: &SessionCode) -> Result<(), RepositoryError> {
        self.check_available()?;
        if let Some(session) = lock(&self.state).sessions.get_mut(code.as_str()) {
            session.status = SessionStatus::Expired;
        }
        Ok(())
    }
}

#[async_trait]
impl VenueRepository for InMemoryRedemptionRepository {
    async fn find_venue(&self, id: VenueId) -> Result<Option<Venue>, RepositoryError> {
        self.check_available()?;
        Ok(lock(&self.state).venues.get(&id).cloned())
    }
}

#[async_trait]
impl RedemptionRepository for InMemoryRedemptionRepository {
    async fn begin_scan(
        &self,
        token_id: TokenId,
    ) -> Result<Box<dyn ScanTransaction>, RepositoryError> {
        self.check_available()?;
        let token_lock = self.token_lock(token_id);
        let guard = tokio::time::timeout(self.lock_wait, token_lock.lock_owned())
            .await
            .map_err(|_| RepositoryError::LockTimeout)?;
        Ok(Box::new(InMemoryScanTransaction {
            state: Arc::clone(&self.state),
            _guard: guard,
            staged_events: Vec::new(),
            applied_decrements: Vec::new(),
            committed: false,
        }))
    }

    async fn append_event(
        &self,
        event: NewRedemptionEvent,
    ) -> Result<RedemptionEvent, RepositoryError> {
        self.check_available()?;
        let event = event.into_event(farepass_core::types::EventId::new());
        lock(&self.state).events.push(event.clone());
        Ok(event)
    }

    async fn query_events(&self, filter: &LedgerFilter) -> Result<LedgerPage, RepositoryError> {
        self.check_available()?;
        let state = lock(&self.state);
        let mut matching: Vec<&RedemptionEvent> = state
            .events
            .iter()
            .filter(|e| {
                filter.from.is_none_or(|from| e.redeemed_at >= from)
                    && filter.to.is_none_or(|to| e.redeemed_at < to)
                    && filter
                        .function_code
                        .as_ref()
                        .is_none_or(|f| e.function_code == *f)
                    && filter
                        .venue_id
                        .is_none_or(|v| e.venue_id == Some(v))
                    && filter.result.is_none_or(|r| e.result == r)
            })
            .collect();
        matching.reverse(); // insertion order is chronological; newest first
        let total = i64::try_from(matching.len()).unwrap_or(i64::MAX);

        let offset = usize::try_from(filter.effective_offset()).unwrap_or(0);
        let limit = usize::try_from(filter.effective_limit()).unwrap_or(0);
        let events = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(LedgerPage { events, total })
    }

    async fn load_entitlements(
        &self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, RepositoryError> {
        self.check_available()?;
        Ok(lock(&self.state).tickets.get(ticket.as_str()).cloned())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_available()
    }
}

/// The in-memory atomic unit of work for one scan.
struct InMemoryScanTransaction {
    state: Arc<StdMutex<StoreState>>,
    _guard: OwnedMutexGuard<()>,
    staged_events: Vec<RedemptionEvent>,
    applied_decrements: Vec<(String, FunctionCode)>,
    committed: bool,
}

#[async_trait]
impl ScanTransaction for InMemoryScanTransaction {
    async fn token_already_redeemed(
        &mut self,
        token_id: TokenId,
    ) -> Result<bool, RepositoryError> {
        Ok(lock(&self.state)
            .events
            .iter()
            .any(|e| e.token_id == token_id && e.result == ScanResult::Success))
    }

    async fn function_already_redeemed(
        &mut self,
        ticket: &TicketCode,
        function: &FunctionCode,
    ) -> Result<bool, RepositoryError> {
        let committed = lock(&self.state).events.iter().any(|e| {
            e.ticket_code == *ticket
                && e.function_code == *function
                && e.result == ScanResult::Success
        });
        let staged = self.staged_events.iter().any(|e| {
            e.ticket_code == *ticket
                && e.function_code == *function
                && e.result == ScanResult::Success
        });
        Ok(committed || staged)
    }

    async fn load_entitlements(
        &mut self,
        ticket: &TicketCode,
    ) -> Result<Option<Vec<Entitlement>>, RepositoryError> {
        Ok(lock(&self.state).tickets.get(ticket.as_str()).cloned())
    }

    async fn decrement_entitlement(
        &mut self,
        ticket: &TicketCode,
        function: &FunctionCode,
    ) -> Result<bool, RepositoryError> {
        let mut state = lock(&self.state);
        let Some(entitlements) = state.tickets.get_mut(ticket.as_str()) else {
            return Ok(false);
        };
        let Some(entitlement) = entitlements
            .iter_mut()
            .find(|e| e.function_code == *function)
        else {
            return Ok(false);
        };
        if entitlement.remaining_uses <= 0 {
            return Ok(false);
        }
        entitlement.remaining_uses -= 1;
        self.applied_decrements
            .push((ticket.as_str().to_string(), function.clone()));
        Ok(true)
    }

    async fn insert_event(
        &mut self,
        event: NewRedemptionEvent,
    ) -> Result<RedemptionEvent, RepositoryError> {
        let event = event.into_event(farepass_core::types::EventId::new());
        if let Some(key) = &event.success_unique_key {
            let state = lock(&self.state);
            let duplicate_key = state
                .events
                .iter()
                .chain(self.staged_events.iter())
                .any(|e| e.success_unique_key.as_deref() == Some(key.as_str()));
            let duplicate_token_success = state
                .events
                .iter()
                .chain(self.staged_events.iter())
                .any(|e| e.token_id == event.token_id && e.result == ScanResult::Success);
            if duplicate_key || duplicate_token_success {
                return Err(RepositoryError::Constraint(format!(
                    "duplicate success for token {}",
                    event.token_id
                )));
            }
        }
        self.staged_events.push(event.clone());
        Ok(event)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), RepositoryError> {
        let mut state = lock(&self.state);
        // Final re-check of the success invariants before the rows land.
        for staged in &self.staged_events {
            if staged.result == ScanResult::Success
                && state
                    .events
                    .iter()
                    .any(|e| e.token_id == staged.token_id && e.result == ScanResult::Success)
            {
                return Err(RepositoryError::Constraint(format!(
                    "duplicate success for token {}",
                    staged.token_id
                )));
            }
        }
        state.events.append(&mut self.staged_events);
        self.applied_decrements.clear();
        self.committed = true;
        Ok(())
    }
}

impl Drop for InMemoryScanTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Roll back: undo balance decrements, discard staged rows.
        let mut state = lock(&self.state);
        for (ticket, function) in self.applied_decrements.drain(..) {
            if let Some(entitlements) = state.tickets.get_mut(&ticket) {
                if let Some(entitlement) = entitlements
                    .iter_mut()
                    .find(|e| e.function_code == function)
                {
                    entitlement.remaining_uses += 1;
                }
            }
        }
        self.staged_events.clear();
    }
}

/// Lock a std mutex, recovering from poisoning.
fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
