//! Central session coordinator.
//!
//! Owns the backend handle, the single active session, the snapshot
//! resolver and the snapshot-structure cache. The operations are split by
//! concern across `session`, `writes`, `finalization` and `selection`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{BackendError, CoordinatorError};
use crate::model::{
    ClassId, DisciplineId, FinalResult, LevelRule, SnapshotId, SnapshotStructure, StudentId,
};
use crate::session::{Session, SessionKey, SessionStore};
use crate::snapshot::SnapshotResolver;
use crate::traits::{AuthObserver, GradingBackend, NoopAuthObserver};

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum concurrent students during a class-wide finalize.
    pub parallelism: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { parallelism: 4 }
    }
}

/// Whether a response was applied to the active session.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Applied(T),
    /// The selection changed while the request was in flight.
    Stale,
}

impl<T> Delivery<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Delivery::Applied(v) => Some(v),
            Delivery::Stale => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Delivery::Stale)
    }
}

/// Keeps the active evaluation session consistent with the grading server.
pub struct EvaluationCoordinator {
    backend: Arc<dyn GradingBackend>,
    store: Mutex<SessionStore>,
    resolver: SnapshotResolver,
    structures: Mutex<HashMap<SnapshotId, Arc<SnapshotStructure>>>,
    auth: Arc<dyn AuthObserver>,
    config: CoordinatorConfig,
}

impl EvaluationCoordinator {
    pub fn new(backend: Arc<dyn GradingBackend>) -> Self {
        Self {
            resolver: SnapshotResolver::new(Arc::clone(&backend)),
            backend,
            store: Mutex::new(SessionStore::new()),
            structures: Mutex::new(HashMap::new()),
            auth: Arc::new(NoopAuthObserver),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_auth_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.auth = observer;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SnapshotResolver {
        &self.resolver
    }

    /// Make a pair the active selection without loading it.
    ///
    /// Switching to a different pair drops the held session; anything still
    /// in flight for the previous pair will be discarded on arrival.
    pub fn select(&self, student_id: StudentId, snapshot_id: SnapshotId) {
        self.store().select(SessionKey::new(student_id, snapshot_id));
    }

    pub fn active_key(&self) -> Option<SessionKey> {
        self.store().active().map(|t| t.key)
    }

    /// A copy of the held session, for rendering.
    pub fn view(&self) -> Option<Session> {
        self.store().session().cloned()
    }

    /// Look up the snapshot of a (class, discipline) pair.
    pub async fn resolve(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> Result<Option<SnapshotId>, CoordinatorError> {
        self.resolver
            .resolve(class_id, discipline_id)
            .await
            .map_err(|e| self.observe(e))
    }

    /// Like [`resolve`](Self::resolve), but a missing snapshot is an error.
    pub async fn require_snapshot(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> Result<SnapshotId, CoordinatorError> {
        self.resolve(class_id, discipline_id)
            .await?
            .ok_or(CoordinatorError::SnapshotUnavailable {
                class_id,
                discipline_id,
            })
    }

    /// Explicitly start evaluation of a (class, discipline) pair.
    pub async fn create_snapshot(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> Result<SnapshotId, CoordinatorError> {
        self.resolver
            .create(class_id, discipline_id)
            .await
            .map_err(|e| self.observe(e))
    }

    /// Capabilities and criteria of a snapshot. Cached for good once read.
    pub async fn structure(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<Arc<SnapshotStructure>, CoordinatorError> {
        let cached = self.structures_cache().get(&snapshot_id).cloned();
        if let Some(structure) = cached {
            debug!(snapshot = %snapshot_id, "structure cache hit");
            return Ok(structure);
        }
        let capabilities = self
            .backend
            .capabilities(snapshot_id)
            .await
            .map_err(|e| self.observe(e))?;
        let structure = Arc::new(SnapshotStructure::new(capabilities));
        self.structures_cache()
            .insert(snapshot_id, Arc::clone(&structure));
        Ok(structure)
    }

    pub async fn level_rules(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<Vec<LevelRule>, CoordinatorError> {
        let mut rules = self
            .backend
            .level_rules(snapshot_id)
            .await
            .map_err(|e| self.observe(e))?;
        rules.sort_by_key(|r| r.level);
        Ok(rules)
    }

    /// Final results of a whole class, sorted by student name.
    pub async fn class_results(
        &self,
        class_id: ClassId,
        snapshot_id: SnapshotId,
    ) -> Result<Vec<FinalResult>, CoordinatorError> {
        let mut results = self
            .backend
            .class_results(class_id, snapshot_id)
            .await
            .map_err(|e| self.observe(e))?;
        results.sort_by(|a, b| a.student_name.cmp(&b.student_name));
        Ok(results)
    }

    pub(crate) fn backend(&self) -> &dyn GradingBackend {
        self.backend.as_ref()
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn structures_cache(&self) -> MutexGuard<'_, HashMap<SnapshotId, Arc<SnapshotStructure>>> {
        self.structures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Report auth failures to the observer.
    pub(crate) fn note_backend_error(&self, err: &BackendError) {
        if let BackendError::Unauthorized { status } = err {
            self.auth.on_auth_failure(*status);
        }
    }

    /// Report and convert a backend error.
    pub(crate) fn observe(&self, err: BackendError) -> CoordinatorError {
        self.note_backend_error(&err);
        err.into()
    }
}
