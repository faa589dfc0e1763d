//! Migration summaries built from persisted state.

use ferry_state::StateBackend;
use ferry_types::summary::{EntitySummary, MigrationSummary};

use crate::errors::EngineError;

/// Summarize every entity of `migration`, keeping the first `limit` failure
/// messages per pipeline kind.
///
/// # Errors
///
/// Returns an infrastructure error if the state backend fails.
pub fn build_summary(
    state: &dyn StateBackend,
    migration: &str,
    limit: usize,
) -> Result<MigrationSummary, EngineError> {
    let mut entities = Vec::new();
    for entity in state.list_entities(migration, None)? {
        let trackers = state.list_trackers(entity.id)?;
        let failures = state.list_failures(entity.id)?;
        entities.push(EntitySummary::build(&entity, &trackers, &failures, limit));
    }
    Ok(MigrationSummary { entities })
}
