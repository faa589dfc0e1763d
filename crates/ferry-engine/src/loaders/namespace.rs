use ferry_types::error::MigrationError;
use ferry_types::page::Record;

use crate::context::PipelineContext;
use crate::errors::store_error;
use crate::pipeline::{LoadOutcome, Loader};

/// Creates the entity's destination namespace at most once.
///
/// An existing namespace, including one created concurrently by another
/// entity, is a no-op rather than an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceLoader;

impl Loader for NamespaceLoader {
    fn load(&self, ctx: &PipelineContext, record: &Record) -> Result<LoadOutcome, MigrationError> {
        let full_path = ctx.entity.destination_full_path();
        let outcome = ctx
            .run
            .destination
            .create_namespace(&full_path, ctx.entity.kind, &record.data)
            .map_err(|e| store_error(&e))?;

        if outcome.created {
            tracing::info!(entity = %ctx.entity.id, full_path, "Created destination namespace");
            Ok(LoadOutcome::Created)
        } else {
            tracing::debug!(entity = %ctx.entity.id, full_path, "Destination namespace already exists");
            Ok(LoadOutcome::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use ferry_state::DestinationStore;
    use serde_json::json;

    #[test]
    fn second_load_is_a_no_op() {
        let env = TestEnv::fallback();
        let ctx = env.context("project");
        let record = Record::new(json!({"name": "Widgets"}));

        assert_eq!(NamespaceLoader.load(&ctx, &record).unwrap(), LoadOutcome::Created);
        assert_eq!(NamespaceLoader.load(&ctx, &record).unwrap(), LoadOutcome::Unchanged);
        let stored = env.destination.find_namespace("imported/widgets").unwrap().unwrap();
        assert_eq!(stored.attributes, json!({"name": "Widgets"}));
    }
}
