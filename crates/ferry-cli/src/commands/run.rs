use std::path::Path;

use anyhow::Result;
use ferry_engine::Migration;

use super::{load_config, print_summary};

/// Execute the `run` command: parse, validate, and run a migration.
pub async fn execute(migration_path: &Path, json: bool) -> Result<()> {
    let config = load_config(migration_path)?;

    tracing::info!(
        migration = config.migration,
        source = config.source.url,
        destination = config.destination.url,
        entities = config.entities.len(),
        "Migration validated"
    );

    let mut migration = Migration::from_config(&config)?;
    let summary = migration.execute().await?;

    print_summary(&summary, json)?;

    if summary.is_success() {
        Ok(())
    } else {
        anyhow::bail!(
            "Migration '{}' finished with {} failed entities",
            config.migration,
            summary.failed_entities()
        )
    }
}
