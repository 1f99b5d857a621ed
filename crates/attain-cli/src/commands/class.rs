//! The `attain class` command.

use std::path::PathBuf;

use anyhow::Result;

use attain_core::model::ClassId;

use super::connect;

pub async fn execute(config: Option<PathBuf>, class_id: ClassId) -> Result<()> {
    let coordinator = connect(config)?;
    let context = coordinator.open_class(class_id).await?;

    println!("Class {} ({})", context.class.name, context.class.term_label);

    println!("\nStudents:");
    for student in &context.students {
        println!("  {:>6}  {}", student.id, student.name);
    }

    println!("\nDisciplines:");
    for slot in &context.disciplines {
        let marker = if slot.principal { "*" } else { " " };
        let status = match slot.snapshot_id {
            Some(id) => format!("snapshot {id}"),
            None => "not started".to_string(),
        };
        println!(
            "  {marker} {:>6}  {}  {status}",
            slot.discipline.id, slot.discipline.name
        );
    }

    match context.default_selection() {
        Some(selection) => match selection.session_key() {
            Some(key) => println!("\nDefault selection: {key}"),
            None => println!(
                "\nDefault discipline {} has not started; run `attain snapshot --class {} --discipline {}`",
                selection.discipline_id, class_id, selection.discipline_id
            ),
        },
        None => println!("\nNo disciplines offered to this class."),
    }

    Ok(())
}
