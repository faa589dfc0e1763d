use std::path::Path;

use ferry_types::error::MigrationError;
use ferry_types::page::Record;

use crate::context::PipelineContext;
use crate::errors::store_error;
use crate::pipeline::{LoadOutcome, Loader};
use crate::stager::validate_artifact;

/// Hands a staged artifact to the destination's bundle import, after
/// validating it once more against the tracker's scratch directory.
#[derive(Debug, Clone)]
pub struct BundleLoader {
    relation: String,
}

impl BundleLoader {
    #[must_use]
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
        }
    }
}

impl Loader for BundleLoader {
    fn load(&self, ctx: &PipelineContext, record: &Record) -> Result<LoadOutcome, MigrationError> {
        let Some(path) = record.str_field("path") else {
            return Err(MigrationError::data(
                "MISSING_ARTIFACT",
                "bundle record carries no artifact path",
            ));
        };
        let Some(scratch) = ctx.scratch_path() else {
            return Err(MigrationError::internal(
                "SCRATCH_MISSING",
                "bundle loaded without a staging directory",
            ));
        };
        let validated = validate_artifact(&scratch, Path::new(path))?;

        let full_path = ctx.entity.destination_full_path();
        let info = ctx
            .run
            .destination
            .import_bundle(&full_path, &self.relation, &validated)
            .map_err(|e| store_error(&e))?;
        tracing::info!(
            entity = %ctx.entity.id,
            relation = %self.relation,
            size = info.size,
            sha256 = %info.sha256,
            "Imported bundle"
        );
        Ok(LoadOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use ferry_state::DestinationStore;
    use ferry_types::error::PATH_TRAVERSAL;
    use serde_json::json;

    #[test]
    fn imports_validated_artifact() {
        let env = TestEnv::fallback();
        let mut ctx = env.context("repository");
        let scratch = ctx.scratch_dir().unwrap().to_path_buf();
        let artifact = scratch.join("project.bundle");
        std::fs::write(&artifact, b"bundle").unwrap();

        let record = Record::new(json!({"path": artifact.to_string_lossy()}));
        assert_eq!(
            BundleLoader::new("repository").load(&ctx, &record).unwrap(),
            LoadOutcome::Created
        );
        assert!(env.destination.exists("imported/widgets", "repository").unwrap());
    }

    #[test]
    fn artifact_outside_scratch_is_rejected() {
        let env = TestEnv::fallback();
        let mut ctx = env.context("repository");
        ctx.scratch_dir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let artifact = elsewhere.path().join("project.bundle");
        std::fs::write(&artifact, b"bundle").unwrap();

        let err = BundleLoader::new("repository")
            .load(&ctx, &Record::new(json!({"path": artifact.to_string_lossy()})))
            .unwrap_err();
        assert_eq!(err.code, PATH_TRAVERSAL);
        assert!(err.aborts_tracker());
        assert!(!env.destination.exists("imported/widgets", "repository").unwrap());
    }
}
