pub mod check;
pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use ferry_engine::config::parser;
use ferry_engine::config::types::MigrationConfig;
use ferry_engine::config::validator;
use ferry_types::summary::MigrationSummary;
use ferry_types::tracker::PipelineKind;

/// Parse and validate a migration file.
fn load_config(path: &Path) -> Result<MigrationConfig> {
    let config = parser::parse_migration(path)
        .with_context(|| format!("Failed to parse migration: {}", path.display()))?;
    validator::validate_migration(&config)?;
    Ok(config)
}

fn print_summary(summary: &MigrationSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if summary.entities.is_empty() {
        println!("No entities registered.");
        return Ok(());
    }

    for entity in &summary.entities {
        println!(
            "{} -> {} [{}]",
            entity.source_full_path, entity.destination_full_path, entity.status
        );
        print_kinds("Finished:", &entity.finished);
        print_kinds("Failed:", &entity.failed);
        print_kinds("Skipped:", &entity.skipped);
        print_kinds("Canceled:", &entity.canceled);
        if entity.security_failures > 0 {
            println!("  {:12} {}", "Security:", entity.security_failures);
        }
        for (kind, messages) in &entity.failures {
            for message in messages {
                println!("    {kind}: {message}");
            }
        }
    }

    println!(
        "\n{} entities, {} failed",
        summary.entities.len(),
        summary.failed_entities()
    );
    Ok(())
}

fn print_kinds(label: &str, kinds: &[PipelineKind]) {
    if kinds.is_empty() {
        return;
    }
    let names: Vec<&str> = kinds.iter().map(PipelineKind::as_str).collect();
    println!("  {:12} {}", label, names.join(", "));
}
