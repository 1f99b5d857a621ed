//! In-memory grading backend.
//!
//! Behaves like the grading server closely enough to drive the coordinator
//! without a network: snapshots copy the discipline template at creation,
//! finalized pairs refuse writes, and final results are computed from the
//! snapshot's level table. Failures and latency can be injected per call.
//!
//! The level computation here only stands in for the server's in tests and
//! demos. The coordinator never computes levels; it shows the result the
//! server returns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use attain_core::error::BackendError;
use attain_core::model::{
    Attainment, Capability, ClassId, ClassInfo, CriterionId, CriterionKind, CriterionOutcome,
    Discipline, DisciplineId, EvaluationRecord, FinalResult, LevelRule, RecordUpsert, SnapshotId,
    SnapshotStructure, Student, StudentId,
};
use attain_core::traits::{BackendResult, GradingBackend};

type Pair = (StudentId, SnapshotId);

struct FrozenSnapshot {
    discipline_id: DisciplineId,
    structure: SnapshotStructure,
    levels: Vec<LevelRule>,
}

#[derive(Default)]
struct World {
    classes: HashMap<ClassId, ClassInfo>,
    students: HashMap<ClassId, Vec<Student>>,
    offered: HashMap<ClassId, Vec<Discipline>>,
    templates: HashMap<DisciplineId, Vec<Capability>>,
    template_levels: HashMap<DisciplineId, Vec<LevelRule>>,
    discipline_names: HashMap<DisciplineId, String>,
    snapshot_of: HashMap<DisciplineId, SnapshotId>,
    snapshots: HashMap<SnapshotId, FrozenSnapshot>,
    records: HashMap<Pair, BTreeMap<CriterionId, CriterionOutcome>>,
    finalized: HashSet<Pair>,
    next_snapshot: u64,

    session_expired: bool,
    failing_reads: u32,
    failing_upserts: u32,
    failing_criteria: HashSet<CriterionId>,
    failing_finalize: HashMap<StudentId, BackendError>,
    latency: HashMap<StudentId, Duration>,
}

#[derive(Default)]
struct Calls {
    evaluations: AtomicU32,
    upserts: AtomicU32,
    finalizes: AtomicU32,
    reopens: AtomicU32,
    status: AtomicU32,
    creates: AtomicU32,
    capabilities: AtomicU32,
}

/// An authoritative grading store held in memory.
pub struct InMemoryBackend {
    world: Mutex<World>,
    calls: Calls,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            world: Mutex::new(World {
                next_snapshot: 1000,
                ..World::default()
            }),
            calls: Calls::default(),
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- fixtures ---------------------------------------------------------

    pub fn add_class(&self, class: ClassInfo) {
        let mut world = self.world();
        world.students.entry(class.id).or_default();
        world.offered.entry(class.id).or_default();
        world.classes.insert(class.id, class);
    }

    pub fn add_student(&self, class_id: ClassId, student_id: StudentId, name: &str) {
        self.world().students.entry(class_id).or_default().push(Student {
            id: student_id,
            name: name.to_string(),
            class_id: Some(class_id),
        });
    }

    /// Offer a discipline to a class with its current template.
    pub fn add_discipline(
        &self,
        class_id: ClassId,
        discipline: Discipline,
        capabilities: Vec<Capability>,
        levels: Vec<LevelRule>,
    ) {
        let mut world = self.world();
        world
            .discipline_names
            .insert(discipline.id, discipline.name.clone());
        world.templates.insert(discipline.id, capabilities);
        world.template_levels.insert(discipline.id, levels);
        world.offered.entry(class_id).or_default().push(discipline);
    }

    /// Replace a discipline's template. Existing snapshots are unaffected.
    pub fn edit_template(&self, discipline_id: DisciplineId, capabilities: Vec<Capability>) {
        self.world().templates.insert(discipline_id, capabilities);
    }

    /// Start evaluation of a discipline as if another user had done it.
    pub fn seed_snapshot(&self, discipline_id: DisciplineId) -> SnapshotId {
        freeze(&mut self.world(), discipline_id)
    }

    pub fn seed_outcome(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
        criterion_id: CriterionId,
        attained: Attainment,
        note: &str,
    ) {
        self.world()
            .records
            .entry((student_id, snapshot_id))
            .or_default()
            .insert(criterion_id, CriterionOutcome::new(attained, note));
    }

    /// Finalize a pair out of band, the way a second user would.
    pub fn finalize_externally(&self, student_id: StudentId, snapshot_id: SnapshotId) {
        lock_pair(&mut self.world(), (student_id, snapshot_id));
    }

    // -- inspection -------------------------------------------------------

    pub fn outcome(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
        criterion_id: CriterionId,
    ) -> Option<CriterionOutcome> {
        self.world()
            .records
            .get(&(student_id, snapshot_id))
            .and_then(|r| r.get(&criterion_id))
            .cloned()
    }

    pub fn is_finalized(&self, student_id: StudentId, snapshot_id: SnapshotId) -> bool {
        self.world().finalized.contains(&(student_id, snapshot_id))
    }

    pub fn snapshot_structure(&self, snapshot_id: SnapshotId) -> Option<SnapshotStructure> {
        self.world()
            .snapshots
            .get(&snapshot_id)
            .map(|s| s.structure.clone())
    }

    pub fn evaluation_reads(&self) -> u32 {
        self.calls.evaluations.load(Ordering::Relaxed)
    }

    pub fn upsert_calls(&self) -> u32 {
        self.calls.upserts.load(Ordering::Relaxed)
    }

    pub fn finalize_calls(&self) -> u32 {
        self.calls.finalizes.load(Ordering::Relaxed)
    }

    pub fn reopen_calls(&self) -> u32 {
        self.calls.reopens.load(Ordering::Relaxed)
    }

    pub fn status_calls(&self) -> u32 {
        self.calls.status.load(Ordering::Relaxed)
    }

    pub fn create_calls(&self) -> u32 {
        self.calls.creates.load(Ordering::Relaxed)
    }

    pub fn capability_reads(&self) -> u32 {
        self.calls.capabilities.load(Ordering::Relaxed)
    }

    // -- failure injection ------------------------------------------------

    /// Every following call answers 401.
    pub fn expire_session(&self) {
        self.world().session_expired = true;
    }

    /// The next `count` evaluation reads fail with a transport error.
    pub fn fail_reads(&self, count: u32) {
        self.world().failing_reads = count;
    }

    /// The next `count` upserts fail with a transport error.
    pub fn fail_upserts(&self, count: u32) {
        self.world().failing_upserts = count;
    }

    /// Upserts of this criterion fail with a 500.
    pub fn fail_criterion(&self, criterion_id: CriterionId) {
        self.world().failing_criteria.insert(criterion_id);
    }

    pub fn fail_finalize_for(&self, student_id: StudentId, error: BackendError) {
        self.world().failing_finalize.insert(student_id, error);
    }

    pub fn clear_failures(&self) {
        let mut world = self.world();
        world.session_expired = false;
        world.failing_reads = 0;
        world.failing_upserts = 0;
        world.failing_criteria.clear();
        world.failing_finalize.clear();
    }

    /// Delay evaluation reads for one student.
    pub fn set_latency(&self, student_id: StudentId, latency: Duration) {
        self.world().latency.insert(student_id, latency);
    }

    fn gate(&self) -> BackendResult<()> {
        if self.world().session_expired {
            return Err(BackendError::Unauthorized { status: 401 });
        }
        Ok(())
    }

    fn snapshot_criteria(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<CriterionId>> {
        self.world()
            .snapshots
            .get(&snapshot_id)
            .map(|s| s.structure.criterion_ids())
            .ok_or_else(|| BackendError::NotFound(format!("snapshot {snapshot_id}")))
    }
}

fn freeze(world: &mut World, discipline_id: DisciplineId) -> SnapshotId {
    if let Some(&existing) = world.snapshot_of.get(&discipline_id) {
        return existing;
    }
    world.next_snapshot += 1;
    let id = SnapshotId(world.next_snapshot);
    let structure = SnapshotStructure::new(
        world
            .templates
            .get(&discipline_id)
            .cloned()
            .unwrap_or_default(),
    );
    let levels = world
        .template_levels
        .get(&discipline_id)
        .cloned()
        .unwrap_or_default();
    world.snapshots.insert(
        id,
        FrozenSnapshot {
            discipline_id,
            structure,
            levels,
        },
    );
    world.snapshot_of.insert(discipline_id, id);
    id
}

/// Lock a pair. Criteria never graded are recorded as unset so the lock is
/// visible on every record.
fn lock_pair(world: &mut World, pair: Pair) {
    let criteria = world
        .snapshots
        .get(&pair.1)
        .map(|s| s.structure.criterion_ids())
        .unwrap_or_default();
    let records = world.records.entry(pair).or_default();
    for criterion_id in criteria {
        records.entry(criterion_id).or_default();
    }
    world.finalized.insert(pair);
}

fn student_name(world: &World, student_id: StudentId) -> String {
    world
        .students
        .values()
        .flatten()
        .find(|s| s.id == student_id)
        .map(|s| s.name.clone())
        .unwrap_or_default()
}

/// Tally attained criteria and pick the highest level whose minimums hold.
fn compute_result(world: &World, pair: Pair) -> BackendResult<FinalResult> {
    let snapshot = world
        .snapshots
        .get(&pair.1)
        .ok_or_else(|| BackendError::NotFound(format!("snapshot {}", pair.1)))?;
    let empty = BTreeMap::new();
    let records = world.records.get(&pair).unwrap_or(&empty);

    let (mut critical_total, mut desirable_total) = (0u32, 0u32);
    let (mut critical_attained, mut desirable_attained) = (0u32, 0u32);
    for criterion in snapshot.structure.criteria() {
        let attained = records
            .get(&criterion.id)
            .is_some_and(|o| o.attained == Attainment::Attained);
        match criterion.kind {
            CriterionKind::Critical => {
                critical_total += 1;
                critical_attained += u32::from(attained);
            }
            CriterionKind::Desirable => {
                desirable_total += 1;
                desirable_attained += u32::from(attained);
            }
        }
    }

    let level = snapshot
        .levels
        .iter()
        .filter(|r| critical_attained >= r.min_critical && desirable_attained >= r.min_desirable)
        .map(|r| r.level)
        .max()
        .unwrap_or(0);
    let total = critical_total + desirable_total;
    let completion_percent = if total == 0 {
        0.0
    } else {
        f64::from(critical_attained + desirable_attained) * 100.0 / f64::from(total)
    };

    Ok(FinalResult {
        student_name: student_name(world, pair.0),
        discipline_name: world
            .discipline_names
            .get(&snapshot.discipline_id)
            .cloned()
            .unwrap_or_default(),
        critical_attained,
        desirable_attained,
        critical_total,
        desirable_total,
        level,
        completion_percent,
    })
}

#[async_trait]
impl GradingBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn class_info(&self, class_id: ClassId) -> BackendResult<ClassInfo> {
        self.gate()?;
        self.world()
            .classes
            .get(&class_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("class {class_id}")))
    }

    async fn students(&self, class_id: ClassId) -> BackendResult<Vec<Student>> {
        self.gate()?;
        self.world()
            .students
            .get(&class_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("class {class_id}")))
    }

    async fn disciplines(&self, class_id: ClassId) -> BackendResult<Vec<Discipline>> {
        self.gate()?;
        self.world()
            .offered
            .get(&class_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("class {class_id}")))
    }

    async fn snapshot_status(
        &self,
        discipline_id: DisciplineId,
    ) -> BackendResult<Option<SnapshotId>> {
        self.calls.status.fetch_add(1, Ordering::Relaxed);
        self.gate()?;
        Ok(self.world().snapshot_of.get(&discipline_id).copied())
    }

    async fn create_snapshot(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> BackendResult<SnapshotId> {
        self.calls.creates.fetch_add(1, Ordering::Relaxed);
        self.gate()?;
        let mut world = self.world();
        let offered = world
            .offered
            .get(&class_id)
            .is_some_and(|d| d.iter().any(|d| d.id == discipline_id));
        if !offered {
            return Err(BackendError::NotFound(format!(
                "discipline {discipline_id} in class {class_id}"
            )));
        }
        Ok(freeze(&mut world, discipline_id))
    }

    async fn capabilities(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<Capability>> {
        self.calls.capabilities.fetch_add(1, Ordering::Relaxed);
        self.gate()?;
        self.world()
            .snapshots
            .get(&snapshot_id)
            .map(|s| s.structure.capabilities.clone())
            .ok_or_else(|| BackendError::NotFound(format!("snapshot {snapshot_id}")))
    }

    async fn level_rules(&self, snapshot_id: SnapshotId) -> BackendResult<Vec<LevelRule>> {
        self.gate()?;
        self.world()
            .snapshots
            .get(&snapshot_id)
            .map(|s| s.levels.clone())
            .ok_or_else(|| BackendError::NotFound(format!("snapshot {snapshot_id}")))
    }

    async fn evaluations(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<Vec<EvaluationRecord>> {
        self.calls.evaluations.fetch_add(1, Ordering::Relaxed);
        let latency = self.world().latency.get(&student_id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.gate()?;

        let mut world = self.world();
        if world.failing_reads > 0 {
            world.failing_reads -= 1;
            return Err(BackendError::Transport("connection reset".into()));
        }
        let pair = (student_id, snapshot_id);
        let finalized = world.finalized.contains(&pair);
        Ok(world
            .records
            .get(&pair)
            .map(|records| {
                records
                    .iter()
                    .map(|(&criterion_id, outcome)| EvaluationRecord {
                        criterion_id,
                        attained: outcome.attained,
                        note: outcome.note.clone(),
                        finalized,
                        evaluated_at: Some(Utc::now()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_evaluation(&self, record: &RecordUpsert) -> BackendResult<()> {
        self.calls.upserts.fetch_add(1, Ordering::Relaxed);
        self.gate()?;
        let criteria = self.snapshot_criteria(record.snapshot_id)?;

        let mut world = self.world();
        if world.failing_upserts > 0 {
            world.failing_upserts -= 1;
            return Err(BackendError::Transport("connection reset".into()));
        }
        if world.failing_criteria.contains(&record.criterion_id) {
            return Err(BackendError::Server {
                status: 500,
                message: format!("could not store criterion {}", record.criterion_id),
            });
        }
        if !criteria.contains(&record.criterion_id) {
            return Err(BackendError::NotFound(format!(
                "criterion {}",
                record.criterion_id
            )));
        }
        let pair = (record.student_id, record.snapshot_id);
        if world.finalized.contains(&pair) {
            return Err(BackendError::Rejected {
                status: 409,
                message: "evaluation is finalized".into(),
            });
        }
        world.records.entry(pair).or_default().insert(
            record.criterion_id,
            CriterionOutcome::new(record.attained, record.note.clone()),
        );
        Ok(())
    }

    async fn finalize(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<FinalResult> {
        self.calls.finalizes.fetch_add(1, Ordering::Relaxed);
        self.gate()?;
        let mut world = self.world();
        if let Some(err) = world.failing_finalize.get(&student_id) {
            return Err(err.clone());
        }
        let pair = (student_id, snapshot_id);
        if !world.snapshots.contains_key(&snapshot_id) {
            return Err(BackendError::NotFound(format!("snapshot {snapshot_id}")));
        }
        if world.finalized.contains(&pair) {
            return Err(BackendError::Rejected {
                status: 400,
                message: "evaluation already finalized".into(),
            });
        }
        lock_pair(&mut world, pair);
        compute_result(&world, pair)
    }

    async fn reopen(&self, student_id: StudentId, snapshot_id: SnapshotId) -> BackendResult<()> {
        self.calls.reopens.fetch_add(1, Ordering::Relaxed);
        self.gate()?;
        let mut world = self.world();
        if !world.finalized.remove(&(student_id, snapshot_id)) {
            return Err(BackendError::Rejected {
                status: 400,
                message: "evaluation is not finalized".into(),
            });
        }
        Ok(())
    }

    async fn final_result(
        &self,
        student_id: StudentId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<FinalResult> {
        self.gate()?;
        let world = self.world();
        let pair = (student_id, snapshot_id);
        if !world.finalized.contains(&pair) {
            return Err(BackendError::NotFound(format!(
                "result for student {student_id}"
            )));
        }
        compute_result(&world, pair)
    }

    async fn class_results(
        &self,
        class_id: ClassId,
        snapshot_id: SnapshotId,
    ) -> BackendResult<Vec<FinalResult>> {
        self.gate()?;
        let world = self.world();
        let students = world
            .students
            .get(&class_id)
            .ok_or_else(|| BackendError::NotFound(format!("class {class_id}")))?;
        students
            .iter()
            .filter(|s| world.finalized.contains(&(s.id, snapshot_id)))
            .map(|s| compute_result(&world, (s.id, snapshot_id)))
            .collect()
    }
}
