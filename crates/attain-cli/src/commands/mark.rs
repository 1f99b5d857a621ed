//! The `attain mark` command.

use std::path::PathBuf;

use anyhow::{bail, Result};

use attain_core::model::{Attainment, CriterionId, SnapshotId, StudentId};

use super::{connect, load_session};

/// Without `--note` the criterion keeps the note the server holds.
pub async fn execute(
    config: Option<PathBuf>,
    student_id: StudentId,
    snapshot_id: SnapshotId,
    criterion_id: CriterionId,
    attained: Attainment,
    note: Option<String>,
) -> Result<()> {
    let coordinator = connect(config)?;
    let session = load_session(&coordinator, student_id, snapshot_id).await?;
    let note = match note {
        Some(note) => note,
        None if session.is_degraded() => {
            bail!("could not read the stored note for criterion {criterion_id}; pass --note")
        }
        None => session
            .outcome(criterion_id)
            .map(|o| o.note.clone())
            .unwrap_or_default(),
    };
    coordinator
        .write(student_id, snapshot_id, criterion_id, attained, note)
        .await?;
    println!("Criterion {criterion_id}: {attained}");
    Ok(())
}
