//! Single and bulk criterion writes.
//!
//! Writes are applied to the local session first and then persisted. A
//! failed persist never rolls back a single field: the whole session is
//! discarded and read back from the server.

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::{Delivery, EvaluationCoordinator};
use crate::error::{BackendError, CoordinatorError, LockedOperation};
use crate::model::{Attainment, CriterionId, CriterionOutcome, RecordUpsert, SnapshotId, StudentId};
use crate::session::SessionKey;

impl EvaluationCoordinator {
    /// Record one criterion outcome.
    ///
    /// Rejected without a request while the session is finalized. A server
    /// refusal that the reloaded session shows to be a lock is reported as
    /// a server-reported [`CoordinatorError::LockViolation`]. Writes to the
    /// same criterion are neither serialized nor debounced; the last one the
    /// server receives wins.
    #[instrument(skip(self, note), fields(student = %student_id, snapshot = %snapshot_id, criterion = %criterion_id))]
    pub async fn write(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
        criterion_id: CriterionId,
        attained: Attainment,
        note: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let key = SessionKey::new(student_id, snapshot_id);
        let note = note.into();
        let ticket = {
            let mut store = self.store();
            let (ticket, session) = store.session_for(key)?;
            session.state().guard(key, LockedOperation::Write)?;
            session.apply(criterion_id, CriterionOutcome::new(attained, note.clone()));
            ticket
        };

        let upsert = RecordUpsert {
            student_id,
            snapshot_id,
            criterion_id,
            attained,
            note,
        };
        match self.backend().upsert_evaluation(&upsert).await {
            Ok(()) => {
                debug!(%attained, "write confirmed");
                Ok(())
            }
            Err(e) => {
                self.note_backend_error(&e);
                warn!(error = %e, "write failed, reloading session");
                let locked = matches!(
                    self.resync(ticket).await,
                    Delivery::Applied(Some(ref session)) if session.is_locked()
                );
                if locked {
                    Err(CoordinatorError::from_transition(e, key, LockedOperation::Write))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Set the same value on many criteria at once.
    ///
    /// Every criterion keeps its current note. All persists run
    /// concurrently; if any of them fails the batch is reported as failed
    /// and the session is reloaded, whatever the server kept.
    #[instrument(skip(self, criterion_ids), fields(student = %student_id, snapshot = %snapshot_id, count = criterion_ids.len()))]
    pub async fn bulk_write(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
        criterion_ids: &[CriterionId],
        attained: Attainment,
    ) -> Result<usize, CoordinatorError> {
        let key = SessionKey::new(student_id, snapshot_id);
        let (ticket, upserts) = {
            let mut store = self.store();
            let (ticket, session) = store.session_for(key)?;
            session.state().guard(key, LockedOperation::Write)?;
            let upserts: Vec<RecordUpsert> = criterion_ids
                .iter()
                .map(|&criterion_id| {
                    let note = session
                        .outcome(criterion_id)
                        .map(|o| o.note.clone())
                        .unwrap_or_default();
                    session.apply(criterion_id, CriterionOutcome::new(attained, note.clone()));
                    RecordUpsert {
                        student_id,
                        snapshot_id,
                        criterion_id,
                        attained,
                        note,
                    }
                })
                .collect();
            (ticket, upserts)
        };
        if upserts.is_empty() {
            return Ok(0);
        }

        let backend = self.backend();
        let results = join_all(upserts.iter().map(|u| backend.upsert_evaluation(u))).await;
        let failures: Vec<BackendError> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            info!(%attained, written = upserts.len(), "bulk write confirmed");
            return Ok(upserts.len());
        }

        if let Some(auth) = failures.iter().find(|e| e.is_auth()) {
            self.note_backend_error(auth);
        }
        warn!(
            failed = failures.len(),
            total = upserts.len(),
            "bulk write failed, reloading session"
        );
        self.resync(ticket).await;
        Err(CoordinatorError::PartialBatchFailure {
            failed: failures.len(),
            total: upserts.len(),
            first_error: failures[0].to_string(),
        })
    }

    /// Set the same value on every criterion of the snapshot.
    pub async fn mark_all(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
        attained: Attainment,
    ) -> Result<usize, CoordinatorError> {
        let structure = self.structure(snapshot_id).await?;
        self.bulk_write(student_id, snapshot_id, &structure.criterion_ids(), attained)
            .await
    }
}
