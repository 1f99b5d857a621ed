//! Snapshot lookup and explicit creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument};

use crate::error::BackendError;
use crate::model::{ClassId, DisciplineId, SnapshotId};
use crate::traits::GradingBackend;

/// Finds (and on request creates) the snapshot of a (class, discipline) pair.
///
/// Snapshot ids never change once assigned, so found ids are remembered.
/// Absence is never remembered; a failed lookup leaves nothing behind.
pub struct SnapshotResolver {
    backend: Arc<dyn GradingBackend>,
    known: Mutex<HashMap<(ClassId, DisciplineId), SnapshotId>>,
}

impl SnapshotResolver {
    pub fn new(backend: Arc<dyn GradingBackend>) -> Self {
        Self {
            backend,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Record an id learned elsewhere, e.g. from the class record.
    pub fn remember(&self, class_id: ClassId, discipline_id: DisciplineId, snapshot_id: SnapshotId) {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((class_id, discipline_id), snapshot_id);
    }

    pub fn cached(&self, class_id: ClassId, discipline_id: DisciplineId) -> Option<SnapshotId> {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(class_id, discipline_id))
            .copied()
    }

    /// Read-only lookup. `Ok(None)` means evaluation has not started.
    #[instrument(skip(self), fields(class = %class_id, discipline = %discipline_id))]
    pub async fn resolve(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> Result<Option<SnapshotId>, BackendError> {
        if let Some(id) = self.cached(class_id, discipline_id) {
            debug!(snapshot = %id, "snapshot already known");
            return Ok(Some(id));
        }
        let found = self.backend.snapshot_status(discipline_id).await?;
        if let Some(id) = found {
            self.remember(class_id, discipline_id, id);
        }
        Ok(found)
    }

    /// Create the snapshot unless one already exists, in which case the
    /// existing id is returned and nothing is sent.
    #[instrument(skip(self), fields(class = %class_id, discipline = %discipline_id))]
    pub async fn create(
        &self,
        class_id: ClassId,
        discipline_id: DisciplineId,
    ) -> Result<SnapshotId, BackendError> {
        if let Some(existing) = self.resolve(class_id, discipline_id).await? {
            info!(snapshot = %existing, "snapshot exists, not creating another");
            return Ok(existing);
        }
        let id = self
            .backend
            .create_snapshot(class_id, discipline_id)
            .await?;
        self.remember(class_id, discipline_id, id);
        info!(snapshot = %id, "snapshot created");
        Ok(id)
    }
}
