use ferry_types::entity::{EntityKind, NewEntity};
use ferry_types::error::MigrationError;
use ferry_types::page::Record;

use super::key_field;
use crate::context::PipelineContext;
use crate::errors::store_error;
use crate::pipeline::{LoadOutcome, Loader};

/// Registers subgroups or projects discovered under a group as new
/// entities of the same migration, nested under the parent's destination.
#[derive(Debug, Clone, Copy)]
pub struct ChildEntitiesLoader {
    kind: EntityKind,
}

impl ChildEntitiesLoader {
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }
}

impl Loader for ChildEntitiesLoader {
    fn load(&self, ctx: &PipelineContext, record: &Record) -> Result<LoadOutcome, MigrationError> {
        let source_full_path = key_field(record, "full_path")?;
        let destination_slug = key_field(record, "path")?;
        if destination_slug.contains('/') || source_full_path.split('/').any(|s| s == "..") {
            return Err(MigrationError::data(
                "INVALID_PATH",
                format!("child path '{source_full_path}' is not a valid entity path"),
            ));
        }

        let registration = ctx
            .run
            .state
            .create_entity(&NewEntity {
                migration: ctx.entity.migration.clone(),
                kind: self.kind,
                source_full_path,
                destination_slug,
                destination_namespace: ctx.entity.destination_full_path(),
                parent_id: Some(ctx.entity.id),
                organization_id: ctx.entity.organization_id,
            })
            .map_err(|e| store_error(&e))?;

        if registration.created {
            tracing::info!(
                parent = %ctx.entity.id,
                entity = %registration.entity.id,
                kind = %self.kind,
                source = %registration.entity.source_full_path,
                "Registered child entity"
            );
            Ok(LoadOutcome::Created)
        } else {
            Ok(LoadOutcome::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use ferry_state::StateBackend;
    use serde_json::json;

    #[test]
    fn children_nest_under_parent_destination() {
        let env = TestEnv::fallback();
        let ctx = env.context("subgroup_entities");
        let loader = ChildEntitiesLoader::new(EntityKind::Group);
        let record = Record::new(json!({"full_path": "acme/widgets/sub", "path": "sub"}));

        assert_eq!(loader.load(&ctx, &record).unwrap(), LoadOutcome::Created);
        assert_eq!(loader.load(&ctx, &record).unwrap(), LoadOutcome::Unchanged);

        let children: Vec<_> = env
            .state
            .list_entities("test", None)
            .unwrap()
            .into_iter()
            .filter(|e| e.parent_id == Some(ctx.entity.id))
            .collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].destination_full_path(), "imported/widgets/sub");
        assert_eq!(children[0].kind, EntityKind::Group);
    }

    #[test]
    fn traversal_in_child_path_is_rejected() {
        let env = TestEnv::fallback();
        let ctx = env.context("project_entities");
        let err = ChildEntitiesLoader::new(EntityKind::Project)
            .load(&ctx, &Record::new(json!({"full_path": "acme/../x", "path": "x"})))
            .unwrap_err();
        assert_eq!(err.code, "INVALID_PATH");
    }
}
