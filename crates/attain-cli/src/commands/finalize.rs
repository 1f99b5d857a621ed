//! The `attain finalize` command.

use std::path::PathBuf;

use anyhow::Result;

use attain_core::model::{SnapshotId, StudentId};

use super::{connect, load_session, print_result};

pub async fn execute(
    config: Option<PathBuf>,
    student_id: StudentId,
    snapshot_id: SnapshotId,
) -> Result<()> {
    let coordinator = connect(config)?;
    load_session(&coordinator, student_id, snapshot_id).await?;
    let result = coordinator.finalize(student_id, snapshot_id).await?;
    println!("Finalized student {student_id}");
    print_result(&result);
    Ok(())
}
