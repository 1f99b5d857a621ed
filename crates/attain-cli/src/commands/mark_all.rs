//! The `attain mark-all` command.

use std::path::PathBuf;

use anyhow::Result;

use attain_core::model::{Attainment, SnapshotId, StudentId};

use super::{connect, load_session};

pub async fn execute(
    config: Option<PathBuf>,
    student_id: StudentId,
    snapshot_id: SnapshotId,
    attained: Attainment,
) -> Result<()> {
    let coordinator = connect(config)?;
    load_session(&coordinator, student_id, snapshot_id).await?;
    let written = coordinator
        .mark_all(student_id, snapshot_id, attained)
        .await?;
    println!("Marked {written} criteria {attained}");
    Ok(())
}
