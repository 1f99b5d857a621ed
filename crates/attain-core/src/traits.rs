//! Trait definitions for the grading server and the session-expiry hook.
//!
//! `GradingBackend` is implemented by `attain-client` (over HTTP and in
//! memory). Every method maps onto one REST operation.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::model::{
    Capability, ClassId, ClassInfo, Discipline, DisciplineId, EvaluationRecord, FinalResult,
    LevelRule, RecordUpsert, SnapshotId, Student, StudentId,
};

pub type BackendResult<T> = Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Grading backend trait
// ---------------------------------------------------------------------------

/// The authoritative store behind an evaluation session.
#[async_trait]
pub trait GradingBackend: Send + Sync {
    /// Human-readable backend name (e.g. "http").
    fn name(&self) -> &str;

    /// `GET /classes/{id}`
    async fn class_info(&self, class_id: ClassId) -> BackendResult<ClassInfo>;

    /// `GET /classes/{id}/students`
    async fn students(&self, class_id: ClassId) -> BackendResult<Vec<Student>>;

    /// `GET /classes/{id}/disciplines`
    async fn disciplines(&self, class_id: ClassId) -> BackendResult<Vec<Discipline>>;

    /// `GET /disciplines/{id}/snapshot-status`. `Ok(None)` when no snapshot exists.
    async fn snapshot_status(&self, discipline_id: DisciplineId)
        -> BackendResult<Option<SnapshotId>>;

    /// `POST /classes/{id}/snapshot/{disciplineId}`
    async fn create_snapshot(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> BackendResult<SnapshotId>;

    /// `GET /structure/{snapshotId}/capabilities`
    async fn capabilities(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<Capability>>;

    /// `GET /disciplines/levels/snapshot/{snapshotId}`
    async fn level_rules(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<LevelRule>>;

    /// `GET /evaluations?studentId&snapshotId`
    async fn evaluations(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<Vec<EvaluationRecord>>;

    /// `POST /evaluations`
    async fn upsert_evaluation(&self, record: &RecordUpsert) -> BackendResult<()>;

    /// `POST /evaluations/finalize?studentId&snapshotId`
    async fn finalize(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<FinalResult>;

    /// `POST /evaluations/reopen?studentId&snapshotId`
    async fn reopen(&self, student_id: StudentId, snapshot_id: SnapshotId) -> BackendResult<()>;

    /// `GET /evaluations/result?studentId&snapshotId`
    async fn final_result(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<FinalResult>;

    /// `GET /evaluations/result/class/{classId}?snapshotId`
    async fn class_results(
        &self,
        class_id: ClassId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<Vec<FinalResult>>;
}

// ---------------------------------------------------------------------------
// Session expiry hook
// ---------------------------------------------------------------------------

/// Receives 401/403 responses seen by any session operation.
///
/// Token storage and logout live outside this crate; implementors decide
/// what an expired session means for them.
pub trait AuthObserver: Send + Sync {
    fn on_auth_failure(&self, status: u16);
}

/// Observer that ignores auth failures.
pub struct NoopAuthObserver;

impl AuthObserver for NoopAuthObserver {
    fn on_auth_failure(&self, _: u16) {}
}
