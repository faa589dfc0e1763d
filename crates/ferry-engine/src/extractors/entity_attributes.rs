use async_trait::async_trait;
use ferry_types::error::MigrationError;
use ferry_types::page::{ExtractedData, Record};
use serde_json::Value;

use crate::context::PipelineContext;
use crate::errors::EngineError;
use crate::pipeline::Extractor;
use crate::source::PageRequest;

/// Relation name the source uses for an entity's own attributes.
const SELF_RELATION: &str = "self";

/// The entity's own attributes as a single record, with the destination
/// location merged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityAttributesExtractor;

#[async_trait]
impl Extractor for EntityAttributesExtractor {
    async fn extract(
        &self,
        ctx: &mut PipelineContext,
        _cursor: Option<&str>,
    ) -> Result<ExtractedData, EngineError> {
        let request = PageRequest {
            entity_path: &ctx.entity.source_full_path,
            entity_kind: ctx.entity.kind,
            relation: SELF_RELATION,
            cursor: None,
            page_size: 1,
        };
        let page = ctx.run.source.fetch_page(&request).await?;
        let Some(Record {
            data: Value::Object(mut attributes),
            ..
        }) = page.records.into_iter().next()
        else {
            return Err(MigrationError::data(
                "ENTITY_NOT_FOUND",
                format!(
                    "source returned no attributes for {} '{}'",
                    ctx.entity.kind, ctx.entity.source_full_path
                ),
            )
            .into());
        };

        attributes.insert(
            "path".into(),
            Value::String(ctx.entity.destination_slug.clone()),
        );
        attributes.insert(
            "full_path".into(),
            Value::String(ctx.entity.destination_full_path()),
        );
        attributes.insert(
            "source_full_path".into(),
            Value::String(ctx.entity.source_full_path.clone()),
        );
        Ok(ExtractedData::single(Record::new(Value::Object(attributes))))
    }
}
