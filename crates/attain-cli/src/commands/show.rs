//! The `attain show` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use attain_core::model::{CriterionOutcome, SnapshotId, StudentId};

use super::{connect, load_session, print_result};

pub async fn execute(
    config: Option<PathBuf>,
    student_id: StudentId,
    snapshot_id: SnapshotId,
) -> Result<()> {
    let coordinator = connect(config)?;
    let session = load_session(&coordinator, student_id, snapshot_id).await?;
    let structure = coordinator.structure(snapshot_id).await?;

    let status = if session.is_locked() { "finalized" } else { "open" };
    println!("Evaluation: {} ({status})", session.key());
    if session.is_degraded() {
        println!("Warning: evaluations could not be read; showing an empty sheet.");
    }

    let mut table = Table::new();
    table.set_header(vec!["Capability", "Criterion", "Kind", "Attained", "Note"]);
    for capability in &structure.capabilities {
        for criterion in &capability.criteria {
            let outcome = session
                .outcome(criterion.id)
                .cloned()
                .unwrap_or_else(CriterionOutcome::default);
            table.add_row(vec![
                Cell::new(&capability.description),
                Cell::new(format!("{} {}", criterion.id, criterion.description)),
                Cell::new(criterion.kind),
                Cell::new(outcome.attained),
                Cell::new(&outcome.note),
            ]);
        }
    }
    println!("{table}");

    if let Some(result) = session.result() {
        print_result(result);
    }

    Ok(())
}
