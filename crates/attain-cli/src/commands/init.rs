//! The `attain init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("attain.toml").exists() {
        println!("attain.toml already exists, skipping.");
    } else {
        std::fs::write("attain.toml", SAMPLE_CONFIG)?;
        println!("Created attain.toml");
    }

    println!("\nNext steps:");
    println!("  1. Set base_url in attain.toml and export ATTAIN_TOKEN");
    println!("  2. Run: attain class <class-id>");
    println!("  3. Run: attain show --student <id> --snapshot <id>");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# attain configuration

base_url = "http://localhost:8080/api"
token = "${ATTAIN_TOKEN}"
timeout_secs = 30

# Students finalized concurrently by `attain finalize-class`
parallelism = 4
"#;
