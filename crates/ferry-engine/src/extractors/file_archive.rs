use std::sync::Arc;

use async_trait::async_trait;
use ferry_types::failure::PipelineStep;
use ferry_types::page::{ExtractedData, Record};
use serde_json::json;

use crate::context::PipelineContext;
use crate::errors::{store_error, EngineError};
use crate::pipeline::Extractor;
use crate::stager::stage_archive;

/// Downloads a relation archive through the secure file stager and yields
/// one record pointing at the validated artifact.
#[derive(Debug, Clone)]
pub struct FileArchiveExtractor {
    relation: String,
    artifact: String,
}

impl FileArchiveExtractor {
    #[must_use]
    pub fn new(relation: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            artifact: artifact.into(),
        }
    }
}

#[async_trait]
impl Extractor for FileArchiveExtractor {
    async fn extract(
        &self,
        ctx: &mut PipelineContext,
        _cursor: Option<&str>,
    ) -> Result<ExtractedData, EngineError> {
        let run = Arc::clone(&ctx.run);
        let destination_path = ctx.entity.destination_full_path();
        if run
            .destination
            .exists(&destination_path, &self.relation)
            .map_err(|e| store_error(&e))?
        {
            tracing::info!(
                entity = %ctx.entity.id,
                relation = %self.relation,
                "Destination already has content, skipping download"
            );
            return Ok(ExtractedData::empty());
        }

        let url = run
            .source
            .download_url(&ctx.entity.source_full_path, ctx.entity.kind, &self.relation)
            .await?;
        run.settings.url_guard.validate_resolved(&url).await?;

        let scratch = ctx.scratch_dir()?.to_path_buf();
        let staged = stage_archive(
            run.source.as_ref(),
            &url,
            &scratch,
            &self.artifact,
            run.settings.archive_limits,
        )
        .await?;

        let record = Record::new(json!({
            "path": staged.path.to_string_lossy(),
            "artifact": self.artifact,
            "size": staged.downloaded_bytes,
        }))
        .with_target(self.relation.clone(), self.artifact.clone());
        Ok(ExtractedData::single(record))
    }

    fn step(&self) -> PipelineStep {
        PipelineStep::FileStager
    }
}
