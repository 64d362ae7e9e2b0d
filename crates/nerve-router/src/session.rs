// crates/nerve-router/src/session.rs
// ============================================================================
// Module: Session Manager
// Description: Session lifecycle, grants, expiry, and in-flight pinning.
// Purpose: Own session records and order requests within each session.
// Dependencies: nerve-config, nerve-core, tokio, tracing
// ============================================================================

//! ## Overview
//! The [`SessionManager`] exclusively owns session records. Expiry is
//! detected lazily when a request begins and eagerly by [`SessionManager::sweep`];
//! both paths are idempotent and closing a closed session is a no-op.
//!
//! A request holds a [`SessionLease`] for its whole lifetime. The lease pins
//! the session against the sweeper and carries a ticket that orders requests
//! of the same session in submission order. Closing a session with in-flight
//! requests revokes every grant at once; the record disappears when the last
//! lease is released.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use nerve_config::SessionsConfig;
use nerve_core::CapabilityPattern;
use nerve_core::Clock;
use nerve_core::Grant;
use nerve_core::Requestor;
use nerve_core::Session;
use nerve_core::SessionId;
use nerve_core::SessionState;
use nerve_core::Timestamp;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Session lifetime and grant limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Inactivity timeout.
    pub idle_timeout_ms: u64,
    /// Longest lifetime of an elevated grant.
    pub max_grant_ttl_ms: u64,
    /// Maximum concurrently open sessions.
    pub max_sessions: usize,
    /// Maximum grants held by one session.
    pub max_grants_per_session: usize,
}

impl SessionSettings {
    /// Builds settings from configuration.
    #[must_use]
    pub const fn from_config(config: &SessionsConfig) -> Self {
        Self {
            idle_timeout_ms: config.idle_timeout_ms,
            max_grant_ttl_ms: config.max_grant_ttl_ms,
            max_sessions: config.max_sessions,
            max_grants_per_session: config.max_grants_per_session,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&SessionsConfig::default())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Session manager errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No session with this id exists.
    #[error("unknown session: {0}")]
    Unknown(SessionId),
    /// Session was closed.
    #[error("session closed: {0}")]
    Closed(SessionId),
    /// Session idled past its timeout.
    #[error("session expired: {0}")]
    Expired(SessionId),
    /// Elevated grants must carry an expiry.
    #[error("elevated grants require an expiry")]
    ExpiryRequired,
    /// Grant expiry is not in the future.
    #[error("grant expiry is not in the future")]
    AlreadyExpired,
    /// Elevated grant outlives the configured maximum.
    #[error("elevated grant ttl exceeds {max_ms} ms")]
    TtlExceeded {
        /// Configured maximum.
        max_ms: u64,
    },
    /// Scope constraint is malformed.
    #[error("grant scope is malformed")]
    InvalidScope,
    /// Too many open sessions.
    #[error("session limit {0} reached")]
    TooManySessions(usize),
    /// Too many grants on one session.
    #[error("grant limit {0} reached")]
    TooManyGrants(usize),
}

impl SessionError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unknown(_) | Self::Closed(_) => "session_unavailable",
            Self::Expired(_) => "session_expired",
            Self::ExpiryRequired => "grant_expiry_required",
            Self::AlreadyExpired => "grant_already_expired",
            Self::TtlExceeded {
                ..
            } => "grant_ttl_exceeded",
            Self::InvalidScope => "invalid_scope",
            Self::TooManySessions(_) => "session_limit",
            Self::TooManyGrants(_) => "grant_limit",
        }
    }
}

// ============================================================================
// SECTION: Ordering
// ============================================================================

/// Ticket bookkeeping for one session.
#[derive(Default)]
struct GateState {
    /// Next ticket to hand out.
    next_ticket: u64,
    /// Ticket currently allowed to run.
    serving: u64,
    /// Finished tickets not yet reached by `serving`.
    done: BTreeSet<u64>,
}

/// FIFO gate ordering requests within a session.
struct OrderGate {
    /// Ticket state.
    state: Mutex<GateState>,
    /// Publishes the ticket being served.
    turn: watch::Sender<u64>,
}

impl OrderGate {
    /// Creates a gate serving ticket zero.
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            turn: watch::Sender::new(0),
        }
    }

    /// Hands out the next ticket.
    fn take_ticket(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    /// Marks `ticket` finished and advances past every finished ticket.
    fn finish(&self, ticket: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.done.insert(ticket);
        let mut serving = state.serving;
        while state.done.remove(&serving) {
            serving += 1;
        }
        state.serving = serving;
        drop(state);
        self.turn.send_replace(serving);
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Session plus runtime bookkeeping.
struct SessionSlot {
    /// Session record.
    session: Session,
    /// Requests currently holding a lease.
    in_flight: usize,
    /// Request ordering gate.
    gate: Arc<OrderGate>,
}

/// State behind the session lock.
#[derive(Default)]
struct SessionTable {
    /// Sessions by id.
    sessions: BTreeMap<SessionId, SessionSlot>,
    /// Counter used to mint session ids.
    minted: u64,
}

impl SessionTable {
    /// Closes a slot, revoking every grant; returns true when the slot should be removed.
    fn close_slot(slot: &mut SessionSlot) -> bool {
        if slot.session.state == SessionState::Open {
            slot.session.state = SessionState::Closed;
            slot.session.grants.clear();
            slot.session.grant_epoch += 1;
        }
        slot.in_flight == 0
    }
}

/// Shared manager state.
struct SessionInner {
    /// Session table.
    table: Mutex<SessionTable>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Limits.
    settings: SessionSettings,
}

impl SessionInner {
    /// Acquires the table lock, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Session Manager
// ============================================================================

/// Owner of all session records.
#[derive(Clone)]
pub struct SessionManager {
    /// Shared state.
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                table: Mutex::new(SessionTable::default()),
                clock,
                settings,
            }),
        }
    }

    /// Opens a new session for `requestor`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TooManySessions`] when the limit is reached.
    pub fn open(&self, requestor: Requestor) -> Result<Session, SessionError> {
        let now = self.inner.clock.now();
        let mut table = self.inner.lock();
        if table.sessions.len() >= self.inner.settings.max_sessions {
            return Err(SessionError::TooManySessions(self.inner.settings.max_sessions));
        }
        table.minted += 1;
        let session_id = SessionId::new(format!("sess-{:08}", table.minted));
        let session = Session {
            session_id: session_id.clone(),
            requestor,
            grants: Vec::new(),
            created_at: now,
            last_activity: now,
            idle_timeout_ms: self.inner.settings.idle_timeout_ms,
            grant_epoch: 0,
            state: SessionState::Open,
        };
        table.sessions.insert(
            session_id.clone(),
            SessionSlot {
                session: session.clone(),
                in_flight: 0,
                gate: Arc::new(OrderGate::new()),
            },
        );
        drop(table);
        info!(
            session_id = %session_id,
            requestor = %session.requestor.id,
            class = session.requestor.class.as_str(),
            "session opened"
        );
        Ok(session)
    }

    /// Returns the open session of `requestor`, opening one when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TooManySessions`] when a new session is needed
    /// and the limit is reached.
    pub fn open_or_resume(&self, requestor: Requestor) -> Result<Session, SessionError> {
        let now = self.inner.clock.now();
        {
            let mut table = self.inner.lock();
            let existing = table.sessions.values_mut().find(|slot| {
                slot.session.state == SessionState::Open
                    && slot.session.requestor == requestor
                    && !slot.session.is_idle_expired(now)
            });
            if let Some(slot) = existing {
                slot.session.last_activity = now;
                return Ok(slot.session.clone());
            }
        }
        self.open(requestor)
    }

    /// Adds or replaces a grant and returns the new grant epoch.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session is unavailable or the grant
    /// violates expiry, scope, or count limits.
    pub fn grant(&self, session_id: &SessionId, grant: Grant) -> Result<u64, SessionError> {
        let now = self.inner.clock.now();
        let settings = self.inner.settings;
        if !grant.scope.is_well_formed() {
            return Err(SessionError::InvalidScope);
        }
        match grant.expires_at {
            None if grant.elevated => return Err(SessionError::ExpiryRequired),
            Some(expiry) if expiry <= now => return Err(SessionError::AlreadyExpired),
            Some(expiry)
                if grant.elevated && expiry.millis_since(now) > settings.max_grant_ttl_ms =>
            {
                return Err(SessionError::TtlExceeded {
                    max_ms: settings.max_grant_ttl_ms,
                });
            }
            _ => {}
        }
        let mut table = self.inner.lock();
        let slot = live_slot(&mut table, session_id, now)?;
        let replaces = slot.session.grants.iter().any(|g| g.pattern == grant.pattern);
        if !replaces && slot.session.grants.len() >= settings.max_grants_per_session {
            return Err(SessionError::TooManyGrants(settings.max_grants_per_session));
        }
        let pattern = grant.pattern.clone();
        let elevated = grant.elevated;
        slot.session.upsert_grant(grant);
        slot.session.last_activity = now;
        let epoch = slot.session.grant_epoch;
        drop(table);
        info!(session_id = %session_id, pattern = %pattern, elevated, "grant added");
        Ok(epoch)
    }

    /// Revokes the grant with `pattern`; returns true when one was removed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session is unavailable.
    pub fn revoke(
        &self,
        session_id: &SessionId,
        pattern: &CapabilityPattern,
    ) -> Result<bool, SessionError> {
        let now = self.inner.clock.now();
        let mut table = self.inner.lock();
        let slot = live_slot(&mut table, session_id, now)?;
        let removed = slot.session.remove_grant(pattern);
        slot.session.last_activity = now;
        drop(table);
        if removed {
            info!(session_id = %session_id, pattern = %pattern, "grant revoked");
        }
        Ok(removed)
    }

    /// Closes a session, revoking every grant at once.
    ///
    /// Returns true when this call closed the session; closing an unknown or
    /// already closed session is a no-op.
    pub fn close(&self, session_id: &SessionId) -> bool {
        let mut table = self.inner.lock();
        let Some(slot) = table.sessions.get_mut(session_id) else {
            return false;
        };
        if slot.session.state == SessionState::Closed {
            return false;
        }
        if SessionTable::close_slot(slot) {
            table.sessions.remove(session_id);
        }
        drop(table);
        info!(session_id = %session_id, "session closed");
        true
    }

    /// Returns a snapshot of a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session is unknown or closed.
    pub fn get(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        let table = self.inner.lock();
        let slot = table
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::Unknown(session_id.clone()))?;
        if slot.session.state == SessionState::Closed {
            return Err(SessionError::Closed(session_id.clone()));
        }
        Ok(slot.session.clone())
    }

    /// Starts a request against a session.
    ///
    /// Expiry is checked here; an expired session is closed on the spot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the session is unknown, closed, or expired.
    pub fn begin_request(&self, session_id: &SessionId) -> Result<SessionLease, SessionError> {
        let now = self.inner.clock.now();
        let mut table = self.inner.lock();
        let slot = live_slot(&mut table, session_id, now)?;
        slot.session.last_activity = now;
        slot.in_flight += 1;
        let gate = Arc::clone(&slot.gate);
        let ticket = gate.take_ticket();
        drop(table);
        Ok(SessionLease {
            inner: Arc::clone(&self.inner),
            session_id: session_id.clone(),
            gate,
            ticket,
        })
    }

    /// Closes idle sessions that have no in-flight requests and prunes
    /// expired grants; returns the ids of sessions closed.
    pub fn sweep(&self) -> Vec<SessionId> {
        let now = self.inner.clock.now();
        let mut table = self.inner.lock();
        let mut closed = Vec::new();
        table.sessions.retain(|id, slot| {
            if slot.in_flight > 0 {
                return true;
            }
            if slot.session.state == SessionState::Closed {
                return false;
            }
            if slot.session.is_idle_expired(now) {
                closed.push(id.clone());
                return false;
            }
            slot.session.grants.retain(|grant| !grant.is_expired(now));
            true
        });
        drop(table);
        for id in &closed {
            info!(session_id = %id, "session expired by sweep");
        }
        closed
    }

    /// Number of tracked sessions, including closed ones still pinned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Returns true when no sessions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs [`SessionManager::sweep`] every `interval` on the current runtime.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let closed = manager.sweep();
                if !closed.is_empty() {
                    debug!(count = closed.len(), "session sweep closed sessions");
                }
            }
        })
    }
}

// ============================================================================
// SECTION: Leases
// ============================================================================

/// In-flight pin on a session; releases on drop.
pub struct SessionLease {
    /// Manager state.
    inner: Arc<SessionInner>,
    /// Pinned session.
    session_id: SessionId,
    /// Ordering gate of the session.
    gate: Arc<OrderGate>,
    /// Position in the session's request order.
    ticket: u64,
}

impl SessionLease {
    /// Pinned session id.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Waits until every earlier request of this session has finished.
    pub async fn wait_turn(&self) {
        let mut turn = self.gate.turn.subscribe();
        let ticket = self.ticket;
        if turn.wait_for(|serving| *serving >= ticket).await.is_err() {
            warn!(session_id = %self.session_id, "session order gate closed");
        }
    }

    /// Returns the current session state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] when the session closed after the lease was taken.
    pub fn snapshot(&self) -> Result<Session, SessionError> {
        let table = self.inner.lock();
        match table.sessions.get(&self.session_id) {
            Some(slot) if slot.session.state == SessionState::Open => Ok(slot.session.clone()),
            _ => Err(SessionError::Closed(self.session_id.clone())),
        }
    }

    /// Returns the session's current grant epoch, or `None` once closed.
    #[must_use]
    pub fn grant_epoch(&self) -> Option<u64> {
        let table = self.inner.lock();
        table
            .sessions
            .get(&self.session_id)
            .filter(|slot| slot.session.state == SessionState::Open)
            .map(|slot| slot.session.grant_epoch)
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        {
            let mut table = self.inner.lock();
            let remove = table.sessions.get_mut(&self.session_id).is_some_and(|slot| {
                slot.in_flight = slot.in_flight.saturating_sub(1);
                slot.in_flight == 0 && slot.session.state == SessionState::Closed
            });
            if remove {
                table.sessions.remove(&self.session_id);
            }
        }
        self.gate.finish(self.ticket);
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns an open, unexpired slot, closing it first when it has expired.
fn live_slot<'a>(
    table: &'a mut SessionTable,
    session_id: &SessionId,
    now: Timestamp,
) -> Result<&'a mut SessionSlot, SessionError> {
    let expired_removable = match table.sessions.get_mut(session_id) {
        None => return Err(SessionError::Unknown(session_id.clone())),
        Some(slot) if slot.session.state == SessionState::Closed => {
            return Err(SessionError::Closed(session_id.clone()));
        }
        Some(slot) if slot.session.is_idle_expired(now) => Some(SessionTable::close_slot(slot)),
        Some(_) => None,
    };
    if let Some(removable) = expired_removable {
        if removable {
            table.sessions.remove(session_id);
        }
        info!(session_id = %session_id, "session expired on use");
        return Err(SessionError::Expired(session_id.clone()));
    }
    table.sessions.get_mut(session_id).ok_or_else(|| SessionError::Unknown(session_id.clone()))
}

#[cfg(test)]
mod tests;
