//! The `attain reopen` command.

use std::path::PathBuf;

use anyhow::Result;

use attain_core::model::{SnapshotId, StudentId};

use super::{connect, load_session};

pub async fn execute(
    config: Option<PathBuf>,
    student_id: StudentId,
    snapshot_id: SnapshotId,
) -> Result<()> {
    let coordinator = connect(config)?;
    load_session(&coordinator, student_id, snapshot_id).await?;
    coordinator.reopen(student_id, snapshot_id).await?;
    println!("Reopened student {student_id}");
    Ok(())
}
