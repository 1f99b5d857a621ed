//! The `attain resolve` command.

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
    match coordinator.resolve(class_id, discipline_id).await? {
        Some(snapshot_id) => println!("Snapshot {snapshot_id}"),
        None => println!("Evaluation of discipline {discipline_id} has not started."),
    }
    Ok(())
}
