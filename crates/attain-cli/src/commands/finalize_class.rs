//! The `attain finalize-class` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use attain_core::model::{ClassId, DisciplineId};

use super::connect;

pub async fn execute(
    config: Option<PathBuf>,
    class_id: ClassId,
    discipline_id: DisciplineId,
) -> Result<()> {
    let coordinator = connect(config)?;
    let snapshot_id = coordinator.require_snapshot(class_id, discipline_id).await?;
    let report = coordinator.finalize_all(class_id, snapshot_id).await?;

    let mut table = Table::new();
    table.set_header(vec!["Student", "Status", "Level"]);
    for (student, result) in &report.finalized {
        table.add_row(vec![
            Cell::new(&student.name),
            Cell::new("finalized"),
            Cell::new(result.level),
        ]);
    }
    for student in &report.already_finalized {
        table.add_row(vec![
            Cell::new(&student.name),
            Cell::new("already finalized"),
            Cell::new("-"),
        ]);
    }
    for (student, err) in &report.failed {
        table.add_row(vec![
            Cell::new(&student.name),
            Cell::new(format!("failed: {err}")),
            Cell::new("-"),
        ]);
    }
    println!("{table}");

    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} student(s) not finalized; run finalize-class again to retry",
            report.failed.len(),
            report.total()
        );
    }
    Ok(())
}
