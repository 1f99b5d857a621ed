//! The in-memory evaluation session for one (student, snapshot) pair.
//!
//! Exactly one session is held at a time. Every request is issued with a
//! [`Ticket`] naming the key and selection epoch it was issued for; a
//! response is only applied while that ticket is still the active one.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::coordinator::{Delivery, EvaluationCoordinator};
use crate::error::{BackendError, CoordinatorError};
use crate::finalization::FinalizationState;
use crate::model::{
    CriterionId, CriterionOutcome, EvaluationRecord, FinalResult, SnapshotId, StudentId,
};
use crate::traits::GradingBackend;

/// Identifies an evaluation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub student_id: StudentId,
    pub snapshot_id: SnapshotId,
}

impl SessionKey {
    pub fn new(student_id: StudentId, snapshot_id: SnapshotId) -> Self {
        Self {
            student_id,
            snapshot_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "student {} / snapshot {}",
            self.student_id, self.snapshot_id
        )
    }
}

/// Tag carried by every in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub key: SessionKey,
    pub epoch: u64,
}

/// Criterion outcomes and lock state of one student under one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    key: SessionKey,
    records: BTreeMap<CriterionId, CriterionOutcome>,
    state: FinalizationState,
    degraded: bool,
}

impl Session {
    /// A never-evaluated pair: no records, open.
    pub fn empty(key: SessionKey) -> Self {
        Self {
            key,
            records: BTreeMap::new(),
            state: FinalizationState::Open,
            degraded: false,
        }
    }

    /// Stand-in used when the server could not be read.
    pub fn degraded(key: SessionKey) -> Self {
        Self {
            degraded: true,
            ..Self::empty(key)
        }
    }

    /// Build a session from listed records. Any finalized record locks the pair.
    pub fn from_records(key: SessionKey, records: Vec<EvaluationRecord>) -> Self {
        let locked = records.iter().any(|r| r.finalized);
        let records = records
            .into_iter()
            .map(|r| (r.criterion_id, CriterionOutcome::new(r.attained, r.note)))
            .collect();
        Self {
            key,
            records,
            state: FinalizationState::from_lock_flag(locked),
            degraded: false,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn records(&self) -> &BTreeMap<CriterionId, CriterionOutcome> {
        &self.records
    }

    pub fn outcome(&self, criterion_id: CriterionId) -> Option<&CriterionOutcome> {
        self.records.get(&criterion_id)
    }

    pub fn state(&self) -> &FinalizationState {
        &self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    pub fn result(&self) -> Option<&FinalResult> {
        self.state.result()
    }

    /// `true` if this session replaced a failed read and holds no server data.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub(crate) fn state_mut(&mut self) -> &mut FinalizationState {
        &mut self.state
    }

    pub(crate) fn apply(&mut self, criterion_id: CriterionId, outcome: CriterionOutcome) {
        self.records.insert(criterion_id, outcome);
    }
}

/// Holder of the active selection and its session.
#[derive(Debug, Default)]
pub struct SessionStore {
    epoch: u64,
    active: Option<Ticket>,
    session: Option<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` the active selection.
    ///
    /// Selecting a different key drops the held session and starts a new
    /// epoch. Selecting the active key again keeps both.
    pub fn select(&mut self, key: SessionKey) -> Ticket {
        if let Some(active) = self.active {
            if active.key == key {
                return active;
            }
        }
        self.epoch += 1;
        self.session = None;
        let ticket = Ticket {
            key,
            epoch: self.epoch,
        };
        self.active = Some(ticket);
        ticket
    }

    pub fn active(&self) -> Option<Ticket> {
        self.active
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.active.as_ref() == Some(ticket)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The held session for `key` together with its ticket.
    pub fn session_for(
        &mut self,
        key: SessionKey,
    ) -> Result<(Ticket, &mut Session), CoordinatorError> {
        match (self.active, self.session.as_mut()) {
            (Some(ticket), Some(session)) if ticket.key == key => Ok((ticket, session)),
            _ => Err(CoordinatorError::NotSelected(key)),
        }
    }

    /// The held session, only while `ticket` is still current.
    pub fn current_session_mut(&mut self, ticket: &Ticket) -> Option<&mut Session> {
        if self.is_current(ticket) {
            self.session.as_mut()
        } else {
            None
        }
    }

    /// Install a fetched session. Returns `false` and drops it if stale.
    pub fn install(&mut self, ticket: &Ticket, session: Session) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.session = Some(session);
        true
    }

    /// Drop the held session if `ticket` is still current.
    pub fn discard(&mut self, ticket: &Ticket) {
        if self.is_current(ticket) {
            self.session = None;
        }
    }
}

/// Read the authoritative state of a pair.
///
/// A finalized pair also gets its final result; if only that read fails the
/// session stays locked without a cached result.
pub async fn fetch_session(
    backend: &dyn GradingBackend,
    key: SessionKey,
) -> Result<Session, BackendError> {
    let records = backend.evaluations(key.student_id, key.snapshot_id).await?;
    let mut session = Session::from_records(key, records);
    if session.is_locked() {
        match backend.final_result(key.student_id, key.snapshot_id).await {
            Ok(result) => session.state_mut().attach_result(result),
            Err(e) => warn!(%key, error = %e, "finalized session without a readable result"),
        }
    }
    Ok(session)
}

impl EvaluationCoordinator {
    /// Select a pair and load it from the server.
    ///
    /// Never fails. A read error on a pair with nothing loaded installs an
    /// empty, unlocked, degraded session; a session already held for the
    /// pair is kept as is. Returns [`Delivery::Stale`] if the selection
    /// moved on while the response was in flight.
    pub async fn load(&self, student_id: StudentId, snapshot_id: SnapshotId) -> Delivery<Session> {
        let ticket = self.store().select(SessionKey::new(student_id, snapshot_id));
        self.refresh(ticket).await
    }

    /// Reload the active session, if any.
    pub async fn reload(&self) -> Option<Delivery<Session>> {
        let ticket = self.store().active()?;
        Some(self.refresh(ticket).await)
    }

    /// Fetch and install without touching the held session first.
    ///
    /// On a failed read the held session survives, so a lock the client has
    /// already observed is never replaced by an open stand-in.
    pub(crate) async fn refresh(&self, ticket: Ticket) -> Delivery<Session> {
        let err = match fetch_session(self.backend(), ticket.key).await {
            Ok(session) => return self.deliver(&ticket, session),
            Err(e) => e,
        };
        self.note_backend_error(&err);

        let mut store = self.store();
        if !store.is_current(&ticket) {
            debug!(key = %ticket.key, epoch = ticket.epoch, "discarding stale read failure");
            return Delivery::Stale;
        }
        if let Some(held) = store.session() {
            warn!(key = %ticket.key, error = %err, "session read failed, keeping held session");
            return Delivery::Applied(held.clone());
        }
        warn!(key = %ticket.key, error = %err, "session read failed, using empty session");
        let session = Session::degraded(ticket.key);
        store.install(&ticket, session.clone());
        Delivery::Applied(session)
    }

    /// Discard local state for `ticket` and read it back from the server.
    ///
    /// If the read fails the pair stays unloaded: writes answer
    /// [`CoordinatorError::NotSelected`] until a reload succeeds.
    pub(crate) async fn resync(&self, ticket: Ticket) -> Delivery<Option<Session>> {
        self.store().discard(&ticket);
        match fetch_session(self.backend(), ticket.key).await {
            Ok(session) => match self.deliver(&ticket, session) {
                Delivery::Applied(session) => Delivery::Applied(Some(session)),
                Delivery::Stale => Delivery::Stale,
            },
            Err(e) => {
                self.note_backend_error(&e);
                if !self.store().is_current(&ticket) {
                    return Delivery::Stale;
                }
                warn!(key = %ticket.key, error = %e, "resync read failed, session left unloaded");
                Delivery::Applied(None)
            }
        }
    }

    fn deliver(&self, ticket: &Ticket, session: Session) -> Delivery<Session> {
        if self.store().install(ticket, session.clone()) {
            Delivery::Applied(session)
        } else {
            debug!(key = %ticket.key, epoch = ticket.epoch, "discarding stale session response");
            Delivery::Stale
        }
    }
}
