//! The OPEN/FINALIZED lock of an evaluation and its transitions.
//!
//! The state a session starts in is whatever the server reports. Guards run
//! before any request is sent, so finalize-when-finalized, reopen-when-open
//! and write-when-finalized never reach the network.

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::EvaluationCoordinator;
use crate::error::{CoordinatorError, LockedOperation};
use crate::model::{ClassId, FinalResult, SnapshotId, Student, StudentId};
use crate::session::SessionKey;

/// Lock state of one (student, snapshot) pair.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FinalizationState {
    #[default]
    Open,
    /// `result` is `None` only when the server reported the lock but the
    /// result could not be read yet.
    Finalized { result: Option<FinalResult> },
}

impl FinalizationState {
    pub fn from_lock_flag(locked: bool) -> Self {
        if locked {
            FinalizationState::Finalized { result: None }
        } else {
            FinalizationState::Open
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, FinalizationState::Finalized { .. })
    }

    pub fn result(&self) -> Option<&FinalResult> {
        match self {
            FinalizationState::Finalized { result } => result.as_ref(),
            FinalizationState::Open => None,
        }
    }

    /// Check that `operation` is legal from this state.
    pub fn guard(&self, key: SessionKey, operation: LockedOperation) -> Result<(), CoordinatorError> {
        match (self, operation) {
            (FinalizationState::Open, LockedOperation::Write | LockedOperation::Finalize) => Ok(()),
            (FinalizationState::Finalized { .. }, LockedOperation::Reopen) => Ok(()),
            (FinalizationState::Finalized { .. }, _) => Err(CoordinatorError::client_lock(
                key,
                operation,
                "evaluation is finalized",
            )),
            (FinalizationState::Open, LockedOperation::Reopen) => Err(
                CoordinatorError::client_lock(key, operation, "evaluation is open"),
            ),
        }
    }

    /// OPEN -> FINALIZED.
    pub fn finalize(&mut self, key: SessionKey, result: FinalResult) -> Result<(), CoordinatorError> {
        self.guard(key, LockedOperation::Finalize)?;
        *self = FinalizationState::Finalized {
            result: Some(result),
        };
        Ok(())
    }

    /// FINALIZED -> OPEN, returning the discarded result.
    pub fn reopen(&mut self, key: SessionKey) -> Result<Option<FinalResult>, CoordinatorError> {
        self.guard(key, LockedOperation::Reopen)?;
        match std::mem::take(self) {
            FinalizationState::Finalized { result } => Ok(result),
            FinalizationState::Open => Ok(None),
        }
    }

    /// Fill in a missing result. No effect on an open session or one that
    /// already holds a result.
    pub fn attach_result(&mut self, result: FinalResult) {
        if let FinalizationState::Finalized { result: slot @ None } = self {
            *slot = Some(result);
        }
    }
}

/// Per-student outcome of a class-wide finalize.
#[derive(Debug, Clone, PartialEq)]
pub enum StudentFinalizeOutcome {
    Finalized(FinalResult),
    AlreadyFinalized,
    Failed(CoordinatorError),
}

/// Outcome of [`EvaluationCoordinator::finalize_all`].
///
/// The server gives no atomicity guarantee, so the report lists every
/// student individually. Running the operation again only touches the
/// students that are still open.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassFinalizeReport {
    pub finalized: Vec<(Student, FinalResult)>,
    pub already_finalized: Vec<Student>,
    pub failed: Vec<(Student, CoordinatorError)>,
}

impl ClassFinalizeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.finalized.len() + self.already_finalized.len() + self.failed.len()
    }

    /// Students that still need finalizing.
    pub fn pending(&self) -> Vec<StudentId> {
        self.failed.iter().map(|(s, _)| s.id).collect()
    }

    fn record(&mut self, student: Student, outcome: StudentFinalizeOutcome) {
        match outcome {
            StudentFinalizeOutcome::Finalized(result) => self.finalized.push((student, result)),
            StudentFinalizeOutcome::AlreadyFinalized => self.already_finalized.push(student),
            StudentFinalizeOutcome::Failed(err) => self.failed.push((student, err)),
        }
    }

    fn sort(&mut self) {
        self.finalized.sort_by_key(|(s, _)| s.id);
        self.already_finalized.sort_by_key(|s| s.id);
        self.failed.sort_by_key(|(s, _)| s.id);
    }
}

impl EvaluationCoordinator {
    /// Finalize the loaded session.
    ///
    /// On success the returned result is cached and the session is read
    /// back from the server; if that read fails the locally finalized
    /// session is kept. On failure the session is discarded and
    /// reloaded; a server refusal surfaces as a server-reported
    /// [`CoordinatorError::LockViolation`].
    #[instrument(skip(self), fields(student = %student_id, snapshot = %snapshot_id))]
    pub async fn finalize(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> Result<FinalResult, CoordinatorError> {
        let key = SessionKey::new(student_id, snapshot_id);
        let ticket = {
            let mut store = self.store();
            let (ticket, session) = store.session_for(key)?;
            session.state().guard(key, LockedOperation::Finalize)?;
            ticket
        };

        match self.backend().finalize(student_id, snapshot_id).await {
            Ok(result) => {
                {
                    let mut store = self.store();
                    if let Some(session) = store.current_session_mut(&ticket) {
                        if session.state_mut().finalize(key, result.clone()).is_err() {
                            session.state_mut().attach_result(result.clone());
                        }
                    }
                }
                info!(level = result.level, "evaluation finalized");
                self.refresh(ticket).await;
                if let Some(session) = self.store().current_session_mut(&ticket) {
                    session.state_mut().attach_result(result.clone());
                }
                Ok(result)
            }
            Err(e) => {
                self.note_backend_error(&e);
                warn!(error = %e, "finalize failed, reloading session");
                self.resync(ticket).await;
                Err(CoordinatorError::from_transition(
                    e,
                    key,
                    LockedOperation::Finalize,
                ))
            }
        }
    }

    /// Reopen the loaded session. Criterion values are kept; the cached
    /// result is dropped. A failed confirming read keeps the reopened
    /// session.
    #[instrument(skip(self), fields(student = %student_id, snapshot = %snapshot_id))]
    pub async fn reopen(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> Result<(), CoordinatorError> {
        let key = SessionKey::new(student_id, snapshot_id);
        let ticket = {
            let mut store = self.store();
            let (ticket, session) = store.session_for(key)?;
            session.state().guard(key, LockedOperation::Reopen)?;
            ticket
        };

        match self.backend().reopen(student_id, snapshot_id).await {
            Ok(()) => {
                {
                    let mut store = self.store();
                    if let Some(session) = store.current_session_mut(&ticket) {
                        match session.state_mut().reopen(key) {
                            Ok(result) => {
                                debug!(had_result = result.is_some(), "dropped cached result")
                            }
                            Err(_) => debug!("session already open locally"),
                        }
                    }
                }
                info!("evaluation reopened");
                self.refresh(ticket).await;
                Ok(())
            }
            Err(e) => {
                self.note_backend_error(&e);
                warn!(error = %e, "reopen failed, reloading session");
                self.resync(ticket).await;
                Err(CoordinatorError::from_transition(
                    e,
                    key,
                    LockedOperation::Reopen,
                ))
            }
        }
    }

    /// Finalize every student of a class under one snapshot.
    ///
    /// Students are processed concurrently, bounded by the configured
    /// parallelism. A student whose records are already finalized is
    /// skipped. The active session is reloaded afterwards if it belongs to
    /// this snapshot.
    #[instrument(skip(self), fields(class = %class_id, snapshot = %snapshot_id))]
    pub async fn finalize_all(
        &self,
        class_id: ClassId,
        snapshot_id: SnapshotId,
    ) -> Result<ClassFinalizeReport, CoordinatorError> {
        let students = self
            .backend()
            .students(class_id)
            .await
            .map_err(|e| self.observe(e))?;

        let semaphore = Semaphore::new(self.config().parallelism.max(1));
        let mut pending = FuturesUnordered::new();
        for student in students {
            let semaphore = &semaphore;
            pending.push(async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => self.finalize_student(student.id, snapshot_id).await,
                    Err(_) => StudentFinalizeOutcome::Failed(CoordinatorError::Transport(
                        crate::error::BackendError::Transport("worker pool closed".into()),
                    )),
                };
                (student, outcome)
            });
        }

        let mut report = ClassFinalizeReport::default();
        while let Some((student, outcome)) = pending.next().await {
            report.record(student, outcome);
        }
        report.sort();

        if report.is_complete() {
            info!(
                finalized = report.finalized.len(),
                skipped = report.already_finalized.len(),
                "class finalized"
            );
        } else {
            warn!(
                failed = report.failed.len(),
                total = report.total(),
                "class finalize incomplete"
            );
        }

        let active = self.store().active();
        if let Some(ticket) = active {
            if ticket.key.snapshot_id == snapshot_id {
                self.refresh(ticket).await;
            }
        }
        Ok(report)
    }

    async fn finalize_student(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> StudentFinalizeOutcome {
        let key = SessionKey::new(student_id, snapshot_id);
        let records = match self.backend().evaluations(student_id, snapshot_id).await {
            Ok(records) => records,
            Err(e) => return StudentFinalizeOutcome::Failed(self.observe(e)),
        };
        if records.iter().any(|r| r.finalized) {
            return StudentFinalizeOutcome::AlreadyFinalized;
        }
        match self.backend().finalize(student_id, snapshot_id).await {
            Ok(result) => StudentFinalizeOutcome::Finalized(result),
            Err(e) => {
                self.note_backend_error(&e);
                StudentFinalizeOutcome::Failed(CoordinatorError::from_transition(
                    e,
                    key,
                    LockedOperation::Finalize,
                ))
            }
        }
    }
}
