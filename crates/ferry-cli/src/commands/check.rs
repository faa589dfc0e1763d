use std::path::Path;

use anyhow::Result;
use ferry_engine::check_migration;

use super::load_config;

/// Execute the `check` command: validate config, stores and source URL.
pub async fn execute(migration_path: &Path) -> Result<()> {
    let config = load_config(migration_path)?;
    println!("Migration structure: OK");

    let result = check_migration(&config).await?;

    print_line("Group pipelines:", &result.group_pipelines.to_string());
    print_line("Project pipelines:", &result.project_pipelines.to_string());
    print_line("State backend:", status(result.state_ok));
    print_line("Destination store:", status(result.destination_ok));
    print_line("Source URL:", status(result.source_error.is_none()));
    if let Some(message) = &result.source_error {
        println!("  {message}");
    }

    if result.is_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAILED"
    }
}

fn print_line(label: &str, value: &str) {
    println!("{label:18} {value}");
}
