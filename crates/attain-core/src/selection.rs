//! Class context and the default (student, discipline) selection.

use futures::future::join_all;
use tracing::{instrument, warn};

use crate::coordinator::EvaluationCoordinator;
use crate::error::CoordinatorError;
use crate::model::{ClassId, ClassInfo, Discipline, DisciplineId, SnapshotId, Student, StudentId};
use crate::session::SessionKey;

/// A discipline offered to a class and the snapshot it is evaluated under.
#[derive(Debug, Clone, PartialEq)]
pub struct DisciplineSlot {
    pub discipline: Discipline,
    /// The class's principal discipline.
    pub principal: bool,
    /// `None` until evaluation of this discipline has started.
    pub snapshot_id: Option<SnapshotId>,
}

impl DisciplineSlot {
    pub fn is_started(&self) -> bool {
        self.snapshot_id.is_some()
    }
}

/// Everything the evaluation screen needs about one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassContext {
    pub class: ClassInfo,
    pub students: Vec<Student>,
    pub disciplines: Vec<DisciplineSlot>,
}

/// What the user is currently looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub student_id: Option<StudentId>,
    pub discipline_id: DisciplineId,
    pub snapshot_id: Option<SnapshotId>,
}

impl Selection {
    /// The session to load, once both a student and a snapshot exist.
    pub fn session_key(&self) -> Option<SessionKey> {
        Some(SessionKey::new(self.student_id?, self.snapshot_id?))
    }
}

impl ClassContext {
    pub fn slot(&self, discipline_id: DisciplineId) -> Option<&DisciplineSlot> {
        self.disciplines
            .iter()
            .find(|d| d.discipline.id == discipline_id)
    }

    /// Principal discipline (or the first one) and the first student.
    pub fn default_selection(&self) -> Option<Selection> {
        let slot = self
            .disciplines
            .iter()
            .find(|d| d.principal)
            .or_else(|| self.disciplines.first())?;
        Some(Selection {
            student_id: self.students.first().map(|s| s.id),
            discipline_id: slot.discipline.id,
            snapshot_id: slot.snapshot_id,
        })
    }

    /// Selection for an explicit discipline and optional student.
    pub fn selection_for(
        &self,
        discipline_id: DisciplineId,
        student_id: Option<StudentId>,
    ) -> Option<Selection> {
        let slot = self.slot(discipline_id)?;
        Some(Selection {
            student_id: student_id.or_else(|| self.students.first().map(|s| s.id)),
            discipline_id,
            snapshot_id: slot.snapshot_id,
        })
    }

    /// Record a snapshot created after the context was loaded.
    pub fn mark_started(&mut self, discipline_id: DisciplineId, snapshot_id: SnapshotId) {
        if let Some(slot) = self
            .disciplines
            .iter_mut()
            .find(|d| d.discipline.id == discipline_id)
        {
            slot.snapshot_id = Some(snapshot_id);
        }
    }
}

impl EvaluationCoordinator {
    /// Load a class, its roster and disciplines, and resolve each
    /// discipline's snapshot.
    ///
    /// A discipline whose lookup fails is shown as not started.
    #[instrument(skip(self), fields(class = %class_id))]
    pub async fn open_class(&self, class_id: ClassId) -> Result<ClassContext, CoordinatorError> {
        let backend = self.backend();
        let (class, students, disciplines) = futures::try_join!(
            backend.class_info(class_id),
            backend.students(class_id),
            backend.disciplines(class_id),
        )
        .map_err(|e| self.observe(e))?;

        if let (Some(discipline_id), Some(snapshot_id)) = (class.discipline_id, class.snapshot_id) {
            self.resolver().remember(class_id, discipline_id, snapshot_id);
        }

        let lookups = disciplines.iter().map(|d| async move {
            match self.resolver().resolve(class_id, d.id).await {
                Ok(found) => found,
                Err(e) => {
                    self.note_backend_error(&e);
                    warn!(discipline = %d.id, error = %e, "snapshot lookup failed");
                    None
                }
            }
        });
        let snapshots = join_all(lookups).await;

        let disciplines = disciplines
            .into_iter()
            .zip(snapshots)
            .map(|(discipline, snapshot_id)| DisciplineSlot {
                principal: class.discipline_id == Some(discipline.id),
                discipline,
                snapshot_id,
            })
            .collect();

        Ok(ClassContext {
            class,
            students,
            disciplines,
        })
    }
}
