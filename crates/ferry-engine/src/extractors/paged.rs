use async_trait::async_trait;
use ferry_types::page::ExtractedData;

use crate::context::PipelineContext;
use crate::errors::EngineError;
use crate::pipeline::Extractor;
use crate::source::PageRequest;

/// Cursor-paged export of one source relation.
#[derive(Debug, Clone)]
pub struct PagedExtractor {
    relation: String,
}

impl PagedExtractor {
    #[must_use]
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
        }
    }
}

#[async_trait]
impl Extractor for PagedExtractor {
    async fn extract(
        &self,
        ctx: &mut PipelineContext,
        cursor: Option<&str>,
    ) -> Result<ExtractedData, EngineError> {
        let request = PageRequest {
            entity_path: &ctx.entity.source_full_path,
            entity_kind: ctx.entity.kind,
            relation: &self.relation,
            cursor,
            page_size: ctx.run.settings.page_size,
        };
        Ok(ctx.run.source.fetch_page(&request).await?)
    }
}
