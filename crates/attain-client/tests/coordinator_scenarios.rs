//! Coordinator behavior against the in-memory grading backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use attain_client::InMemoryBackend;
use attain_core::error::{BackendError, LockedOperation, ViolationSource};
use attain_core::model::{
    Attainment, Capability, CapabilityId, CapabilityKind, ClassId, ClassInfo, Criterion,
    CriterionId, CriterionKind, Discipline, DisciplineId, LevelRule, StudentId,
};
use attain_core::{
    AuthObserver, CoordinatorConfig, CoordinatorError, Delivery, ErrorKind, EvaluationCoordinator,
    SessionKey,
};

const CLASS: ClassId = ClassId(10);
const NETWORKS: DisciplineId = DisciplineId(3);
const DATABASES: DisciplineId = DisciplineId(4);
const ANA: StudentId = StudentId(7);
const BRUNO: StudentId = StudentId(8);
const CARLA: StudentId = StudentId(9);

fn criterion(id: u64, kind: CriterionKind) -> Criterion {
    Criterion {
        id: CriterionId(id),
        description: format!("criterion {id}"),
        kind,
    }
}

fn rule(level: u32, min_critical: u32, min_desirable: u32) -> LevelRule {
    LevelRule {
        level,
        min_critical,
        min_desirable,
        code: None,
        description: None,
    }
}

fn school() -> Arc<InMemoryBackend> {
    let backend = InMemoryBackend::new();
    backend.add_class(ClassInfo {
        id: CLASS,
        name: "3A".into(),
        term_label: "2025/1".into(),
        current_term: Some(1),
        discipline_id: Some(NETWORKS),
        snapshot_id: None,
    });
    backend.add_student(CLASS, ANA, "Ana");
    backend.add_student(CLASS, BRUNO, "Bruno");
    backend.add_student(CLASS, CARLA, "Carla");
    backend.add_discipline(
        CLASS,
        Discipline {
            id: NETWORKS,
            name: "Networks".into(),
            code: Some("NET".into()),
        },
        vec![
            Capability {
                id: CapabilityId(1),
                description: "Configure networks".into(),
                kind: CapabilityKind::Technical,
                criteria: vec![
                    criterion(101, CriterionKind::Critical),
                    criterion(102, CriterionKind::Critical),
                    criterion(103, CriterionKind::Desirable),
                ],
            },
            Capability {
                id: CapabilityId(2),
                description: "Teamwork".into(),
                kind: CapabilityKind::SocioEmotional,
                criteria: vec![criterion(104, CriterionKind::Desirable)],
            },
        ],
        vec![rule(100, 2, 2), rule(50, 1, 0), rule(75, 2, 0)],
    );
    backend.add_discipline(
        CLASS,
        Discipline {
            id: DATABASES,
            name: "Databases".into(),
            code: None,
        },
        vec![Capability {
            id: CapabilityId(3),
            description: "Model data".into(),
            kind: CapabilityKind::Technical,
            criteria: vec![criterion(201, CriterionKind::Critical)],
        }],
        vec![rule(50, 1, 0)],
    );
    Arc::new(backend)
}

fn coordinator(backend: &Arc<InMemoryBackend>) -> EvaluationCoordinator {
    EvaluationCoordinator::new(backend.clone())
}

#[derive(Default)]
struct CountingObserver {
    failures: AtomicU32,
}

impl AuthObserver for CountingObserver {
    fn on_auth_failure(&self, _status: u16) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn start_evaluation_and_load_empty_session() {
    let backend = school();
    let coordinator = coordinator(&backend);

    assert_eq!(coordinator.resolve(CLASS, NETWORKS).await.unwrap(), None);
    let snapshot = coordinator.create_snapshot(CLASS, NETWORKS).await.unwrap();

    let session = coordinator.load(ANA, snapshot).await.applied().unwrap();
    assert!(session.records().is_empty());
    assert!(!session.is_locked());
    assert!(!session.is_degraded());
    assert_eq!(
        coordinator.resolve(CLASS, NETWORKS).await.unwrap(),
        Some(snapshot)
    );
}

#[tokio::test]
async fn confirmed_write_is_visible_after_reload() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    coordinator
        .write(ANA, snapshot, CriterionId(101), Attainment::Attained, "")
        .await
        .unwrap();

    let session = coordinator.load(ANA, snapshot).await.applied().unwrap();
    assert_eq!(
        session.outcome(CriterionId(101)).map(|o| o.attained),
        Some(Attainment::Attained)
    );
}

#[tokio::test]
async fn failed_write_is_replaced_by_server_value() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(ANA, snapshot, CriterionId(101), Attainment::NotAttained, "prior");
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    backend.fail_upserts(1);
    let err = coordinator
        .write(ANA, snapshot, CriterionId(101), Attainment::Attained, "optimistic")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());

    let session = coordinator.view().unwrap();
    let outcome = session.outcome(CriterionId(101)).unwrap();
    assert_eq!(outcome.attained, Attainment::NotAttained);
    assert_eq!(outcome.note, "prior");
}

#[tokio::test]
async fn finalize_after_third_party_finalize_resyncs_locked() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    let session = coordinator.load(ANA, snapshot).await.applied().unwrap();
    assert!(!session.is_locked());

    backend.finalize_externally(ANA, snapshot);
    let err = coordinator.finalize(ANA, snapshot).await.unwrap_err();
    match err {
        CoordinatorError::LockViolation {
            operation,
            reported_by,
            ..
        } => {
            assert_eq!(operation, LockedOperation::Finalize);
            assert_eq!(reported_by, ViolationSource::Server);
        }
        other => panic!("expected lock violation, got {other:?}"),
    }

    let session = coordinator.view().unwrap();
    assert!(session.is_locked());
    assert!(session.result().is_some());
}

#[tokio::test]
async fn load_is_idempotent() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(ANA, snapshot, CriterionId(103), Attainment::Attained, "good");
    let coordinator = coordinator(&backend);

    let first = coordinator.load(ANA, snapshot).await.applied().unwrap();
    let second = coordinator.load(ANA, snapshot).await.applied().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn read_failure_installs_degraded_session() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(ANA, snapshot, CriterionId(101), Attainment::Attained, "");
    backend.fail_reads(1);
    let coordinator = coordinator(&backend);

    let session = coordinator.load(ANA, snapshot).await.applied().unwrap();
    assert!(session.is_degraded());
    assert!(session.records().is_empty());
    assert!(!session.is_locked());

    let session = coordinator.reload().await.unwrap().applied().unwrap();
    assert!(!session.is_degraded());
    assert_eq!(session.records().len(), 1);
}

#[tokio::test]
async fn finalize_and_reopen_round_trip() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    coordinator
        .bulk_write(
            ANA,
            snapshot,
            &[CriterionId(101), CriterionId(102)],
            Attainment::Attained,
        )
        .await
        .unwrap();

    let result = coordinator.finalize(ANA, snapshot).await.unwrap();
    assert_eq!(result.level, 75);
    assert_eq!(result.critical_attained, 2);
    assert_eq!(result.desirable_total, 2);

    let session = coordinator.view().unwrap();
    assert!(session.is_locked());
    assert_eq!(session.result(), Some(&result));

    coordinator.reopen(ANA, snapshot).await.unwrap();
    let session = coordinator.view().unwrap();
    assert!(!session.is_locked());
    assert!(session.result().is_none());
    assert_eq!(
        session.outcome(CriterionId(102)).map(|o| o.attained),
        Some(Attainment::Attained)
    );
}

#[tokio::test]
async fn illegal_transitions_are_rejected_locally() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    let err = coordinator.reopen(ANA, snapshot).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    assert_eq!(backend.reopen_calls(), 0);

    coordinator.finalize(ANA, snapshot).await.unwrap();
    let err = coordinator.finalize(ANA, snapshot).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    assert_eq!(backend.finalize_calls(), 1);
}

#[tokio::test]
async fn write_while_locked_sends_nothing() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.finalize_externally(ANA, snapshot);
    let coordinator = coordinator(&backend);

    let session = coordinator.load(ANA, snapshot).await.applied().unwrap();
    assert!(session.is_locked());

    let err = coordinator
        .write(ANA, snapshot, CriterionId(101), Attainment::Attained, "late")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::LockViolation {
            reported_by: ViolationSource::Client,
            ..
        }
    ));
    let err = coordinator
        .mark_all(ANA, snapshot, Attainment::NotAttained)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    assert_eq!(backend.upsert_calls(), 0);
}

#[tokio::test]
async fn write_without_selection_is_refused() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(BRUNO, snapshot).await;
    let err = coordinator
        .write(ANA, snapshot, CriterionId(101), Attainment::Attained, "")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CoordinatorError::NotSelected(SessionKey::new(ANA, snapshot))
    );
    assert_eq!(backend.upsert_calls(), 0);
}

#[tokio::test]
async fn mark_all_covers_every_criterion_and_keeps_notes() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(ANA, snapshot, CriterionId(103), Attainment::NotAttained, "needs work");
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    let written = coordinator
        .mark_all(ANA, snapshot, Attainment::Attained)
        .await
        .unwrap();
    assert_eq!(written, 4);

    let session = coordinator.view().unwrap();
    assert_eq!(session.records().len(), 4);
    assert!(session
        .records()
        .values()
        .all(|o| o.attained == Attainment::Attained));
    assert_eq!(
        backend
            .outcome(ANA, snapshot, CriterionId(103))
            .map(|o| o.note),
        Some("needs work".to_string())
    );
}

#[tokio::test]
async fn partial_bulk_failure_reports_and_resyncs() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.fail_criterion(CriterionId(102));
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    let err = coordinator
        .bulk_write(
            ANA,
            snapshot,
            &[CriterionId(101), CriterionId(102), CriterionId(103)],
            Attainment::Attained,
        )
        .await
        .unwrap_err();
    match &err {
        CoordinatorError::PartialBatchFailure { failed, total, .. } => {
            assert_eq!((*failed, *total), (1, 3));
        }
        other => panic!("expected partial batch failure, got {other:?}"),
    }

    let session = coordinator.view().unwrap();
    assert_eq!(
        session.outcome(CriterionId(101)).map(|o| o.attained),
        Some(Attainment::Attained)
    );
    assert!(session.outcome(CriterionId(102)).is_none());
}

#[tokio::test]
async fn finalize_keeps_lock_when_confirming_read_fails() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    backend.fail_reads(1);
    let result = coordinator.finalize(ANA, snapshot).await.unwrap();
    assert!(backend.is_finalized(ANA, snapshot));

    let session = coordinator.view().unwrap();
    assert!(session.is_locked());
    assert_eq!(session.result(), Some(&result));

    let err = coordinator
        .write(ANA, snapshot, CriterionId(102), Attainment::Attained, "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::LockViolation {
            reported_by: ViolationSource::Client,
            ..
        }
    ));
    assert_eq!(backend.upsert_calls(), 0);
}

#[tokio::test]
async fn reopen_keeps_open_state_when_confirming_read_fails() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    coordinator.finalize(ANA, snapshot).await.unwrap();
    backend.fail_reads(1);
    coordinator.reopen(ANA, snapshot).await.unwrap();

    let session = coordinator.view().unwrap();
    assert!(!session.is_locked());
    assert!(session.result().is_none());
    coordinator
        .write(ANA, snapshot, CriterionId(102), Attainment::Attained, "")
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_resync_leaves_pair_unloaded() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(ANA, snapshot, CriterionId(101), Attainment::Attained, "kept");
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    backend.fail_upserts(1);
    backend.fail_reads(1);
    let err = coordinator
        .write(ANA, snapshot, CriterionId(102), Attainment::Attained, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(coordinator.view().is_none());

    let err = coordinator
        .write(ANA, snapshot, CriterionId(103), Attainment::Attained, "")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CoordinatorError::NotSelected(SessionKey::new(ANA, snapshot))
    );
    assert_eq!(backend.upsert_calls(), 1);

    let session = coordinator.reload().await.unwrap().applied().unwrap();
    assert!(!session.is_degraded());
    assert_eq!(
        session.outcome(CriterionId(101)).map(|o| o.attained),
        Some(Attainment::Attained)
    );
}

#[tokio::test]
async fn write_refused_by_server_lock_is_a_lock_violation() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    backend.finalize_externally(ANA, snapshot);
    let err = coordinator
        .write(ANA, snapshot, CriterionId(101), Attainment::Attained, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockViolation);
    match err {
        CoordinatorError::LockViolation {
            operation,
            reported_by,
            ..
        } => {
            assert_eq!(operation, LockedOperation::Write);
            assert_eq!(reported_by, ViolationSource::Server);
        }
        other => panic!("expected lock violation, got {other:?}"),
    }
    assert!(coordinator.view().unwrap().is_locked());
}

#[tokio::test(start_paused = true)]
async fn slow_resync_for_previous_student_is_discarded() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(BRUNO, snapshot, CriterionId(101), Attainment::NotAttained, "bruno");
    let coordinator = coordinator(&backend);

    coordinator.load(ANA, snapshot).await;
    backend.set_latency(ANA, Duration::from_millis(500));
    backend.fail_upserts(1);

    let (write, bruno) = tokio::join!(
        coordinator.write(ANA, snapshot, CriterionId(101), Attainment::Attained, "ana"),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.load(BRUNO, snapshot).await
        }
    );

    assert_eq!(write.unwrap_err().kind(), ErrorKind::Transport);
    assert!(!bruno.is_stale());
    let session = coordinator.view().unwrap();
    assert_eq!(session.key(), SessionKey::new(BRUNO, snapshot));
    let outcome = session.outcome(CriterionId(101)).unwrap();
    assert_eq!(outcome.attained, Attainment::NotAttained);
    assert_eq!(outcome.note, "bruno");
}

#[tokio::test(start_paused = true)]
async fn slow_response_for_previous_student_is_discarded() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.seed_outcome(ANA, snapshot, CriterionId(101), Attainment::Attained, "ana");
    backend.seed_outcome(BRUNO, snapshot, CriterionId(101), Attainment::NotAttained, "bruno");
    backend.set_latency(ANA, Duration::from_millis(500));
    let coordinator = coordinator(&backend);

    let (ana, bruno) = tokio::join!(coordinator.load(ANA, snapshot), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.load(BRUNO, snapshot).await
    });

    assert_eq!(ana, Delivery::Stale);
    assert!(!bruno.is_stale());
    let session = coordinator.view().unwrap();
    assert_eq!(session.key(), SessionKey::new(BRUNO, snapshot));
    assert_eq!(session.outcome(CriterionId(101)).unwrap().note, "bruno");
}

#[tokio::test]
async fn create_never_duplicates_a_snapshot() {
    let backend = school();
    let coordinator = coordinator(&backend);

    let first = coordinator.create_snapshot(CLASS, NETWORKS).await.unwrap();
    let second = coordinator.create_snapshot(CLASS, NETWORKS).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.create_calls(), 1);

    let other = EvaluationCoordinator::new(backend.clone());
    assert_eq!(other.create_snapshot(CLASS, NETWORKS).await.unwrap(), first);
    assert_eq!(backend.create_calls(), 1);
}

#[tokio::test]
async fn structure_is_frozen_and_cached() {
    let backend = school();
    let coordinator = coordinator(&backend);
    let snapshot = coordinator.create_snapshot(CLASS, NETWORKS).await.unwrap();

    backend.edit_template(NETWORKS, Vec::new());
    let structure = coordinator.structure(snapshot).await.unwrap();
    assert_eq!(structure.criterion_ids().len(), 4);
    coordinator.structure(snapshot).await.unwrap();
    assert_eq!(backend.capability_reads(), 1);

    let levels: Vec<u32> = coordinator
        .level_rules(snapshot)
        .await
        .unwrap()
        .iter()
        .map(|r| r.level)
        .collect();
    assert_eq!(levels, vec![50, 75, 100]);
}

#[tokio::test]
async fn expired_session_notifies_observer() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let observer = Arc::new(CountingObserver::default());
    let coordinator = EvaluationCoordinator::new(backend.clone()).with_auth_observer(observer.clone());

    coordinator.load(ANA, snapshot).await;
    backend.expire_session();
    let err = coordinator
        .write(ANA, snapshot, CriterionId(101), Attainment::Attained, "")
        .await
        .unwrap_err();
    assert_eq!(err, CoordinatorError::Auth { status: 401 });
    assert!(observer.failures.load(Ordering::Relaxed) >= 1);
}

#[tokio::test]
async fn open_class_picks_principal_discipline() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    let context = coordinator.open_class(CLASS).await.unwrap();
    assert_eq!(context.students.len(), 3);
    assert!(context.slot(NETWORKS).unwrap().principal);
    assert!(!context.slot(DATABASES).unwrap().is_started());

    let selection = context.default_selection().unwrap();
    assert_eq!(selection.discipline_id, NETWORKS);
    assert_eq!(selection.session_key(), Some(SessionKey::new(ANA, snapshot)));
}

#[tokio::test]
async fn class_finalize_is_resumable() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    backend.finalize_externally(ANA, snapshot);
    backend.fail_finalize_for(
        CARLA,
        BackendError::Server {
            status: 503,
            message: "busy".into(),
        },
    );
    let coordinator = EvaluationCoordinator::new(backend.clone())
        .with_config(CoordinatorConfig { parallelism: 2 });

    let report = coordinator.finalize_all(CLASS, snapshot).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.total(), 3);
    assert_eq!(report.already_finalized.len(), 1);
    assert_eq!(report.finalized.len(), 1);
    assert_eq!(report.pending(), vec![CARLA]);

    backend.clear_failures();
    let report = coordinator.finalize_all(CLASS, snapshot).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.already_finalized.len(), 2);
    assert_eq!(report.finalized.len(), 1);
    assert_eq!(report.finalized[0].0.id, CARLA);

    let names: Vec<String> = coordinator
        .class_results(CLASS, snapshot)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.student_name)
        .collect();
    assert_eq!(names, vec!["Ana", "Bruno", "Carla"]);
}

#[tokio::test]
async fn class_finalize_refreshes_active_session() {
    let backend = school();
    let snapshot = backend.seed_snapshot(NETWORKS);
    let coordinator = coordinator(&backend);

    coordinator.load(BRUNO, snapshot).await;
    coordinator.finalize_all(CLASS, snapshot).await.unwrap();

    let session = coordinator.view().unwrap();
    assert!(session.is_locked());
    assert!(session.result().is_some());
}

#[tokio::test]
async fn require_snapshot_reports_unstarted_discipline() {
    let backend = school();
    let coordinator = coordinator(&backend);

    let err = coordinator
        .require_snapshot(CLASS, DATABASES)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Selection);
    assert_eq!(
        err,
        CoordinatorError::SnapshotUnavailable {
            class_id: CLASS,
            discipline_id: DATABASES,
        }
    );

    let snapshot = backend.seed_snapshot(DATABASES);
    assert_eq!(
        coordinator.require_snapshot(CLASS, DATABASES).await.unwrap(),
        snapshot
    );
}
