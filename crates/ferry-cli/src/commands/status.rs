use std::path::Path;

use anyhow::{Context, Result};
use ferry_engine::build_summary;
use ferry_engine::resolve;

use super::{load_config, print_summary};

/// Execute the `status` command: print the summary from persisted state.
pub fn execute(migration_path: &Path, json: bool) -> Result<()> {
    let config = load_config(migration_path)?;
    let state = resolve::create_state_backend(&config)?;
    let summary = build_summary(
        state.as_ref(),
        &config.migration,
        config.resources.failure_summary_limit,
    )
    .context("Failed to read migration state")?;
    print_summary(&summary, json)
}
