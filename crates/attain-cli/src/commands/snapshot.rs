//! The `attain snapshot` command.

use std::path::PathBuf;

use anyhow::Result;

use attain_core::model::{ClassId, DisciplineId};

use super::connect;

pub async fn execute(
    config: Option<PathBuf>,
    class_id: ClassId,
    discipline_id: DisciplineId,
) -> Result<()> {
    let coordinator = connect(config)?;
    let snapshot_id = coordinator.create_snapshot(class_id, discipline_id).await?;
    println!("Snapshot {snapshot_id} for discipline {discipline_id}");
    Ok(())
}
