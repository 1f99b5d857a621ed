//! The `attain report` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use attain_core::model::{ClassId, DisciplineId};

use super::connect;

pub async fn execute(
    config: Option<PathBuf>,
    class_id: ClassId,
    discipline_id: DisciplineId,
    json: bool,
) -> Result<()> {
    let coordinator = connect(config)?;
    let snapshot_id = coordinator.require_snapshot(class_id, discipline_id).await?;
    let results = coordinator.class_results(class_id, snapshot_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No finalized evaluations for class {class_id}.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Student", "Level", "Critical", "Desirable", "Complete"]);
    for result in &results {
        table.add_row(vec![
            Cell::new(&result.student_name),
            Cell::new(result.level),
            Cell::new(format!(
                "{}/{}",
                result.critical_attained, result.critical_total
            )),
            Cell::new(format!(
                "{}/{}",
                result.desirable_attained, result.desirable_total
            )),
            Cell::new(format!("{:.1}%", result.completion_percent)),
        ]);
    }
    println!("{table}");

    let rules = coordinator.level_rules(snapshot_id).await?;
    if !rules.is_empty() {
        let mut levels = Table::new();
        levels.set_header(vec!["Level", "Min critical", "Min desirable", "Description"]);
        for rule in &rules {
            levels.add_row(vec![
                Cell::new(rule.level),
                Cell::new(rule.min_critical),
                Cell::new(rule.min_desirable),
                Cell::new(rule.description.as_deref().unwrap_or("")),
            ]);
        }
        println!("{levels}");
    }

    Ok(())
}
