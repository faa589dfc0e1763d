use async_trait::async_trait;
use ferry_types::error::MigrationError;
use ferry_types::page::{ExtractedData, PageInfo, Record};

use crate::context::PipelineContext;
use crate::errors::{store_error, EngineError};
use crate::pipeline::Extractor;

/// Re-reads records already loaded on the destination, relation by
/// relation. The cursor is `"{relation}:{last_row_id}"`.
#[derive(Debug, Clone)]
pub struct DestinationScanExtractor {
    relations: Vec<String>,
}

impl DestinationScanExtractor {
    #[must_use]
    pub fn new(relations: Vec<String>) -> Self {
        Self { relations }
    }

    fn parse_cursor(&self, cursor: Option<&str>) -> Result<(usize, i64), MigrationError> {
        let Some(cursor) = cursor else {
            return Ok((0, 0));
        };
        let invalid = || {
            MigrationError::data("INVALID_CURSOR", format!("malformed scan cursor '{cursor}'"))
        };
        let (relation, after_id) = cursor.rsplit_once(':').ok_or_else(invalid)?;
        let index = self
            .relations
            .iter()
            .position(|r| r == relation)
            .ok_or_else(invalid)?;
        let after_id = after_id.parse().map_err(|_| invalid())?;
        Ok((index, after_id))
    }
}

#[async_trait]
impl Extractor for DestinationScanExtractor {
    async fn extract(
        &self,
        ctx: &mut PipelineContext,
        cursor: Option<&str>,
    ) -> Result<ExtractedData, EngineError> {
        let (index, after_id) = self.parse_cursor(cursor)?;
        let Some(relation) = self.relations.get(index) else {
            return Ok(ExtractedData::empty());
        };

        let limit = ctx.run.settings.page_size.max(1) as usize;
        let rows = ctx
            .run
            .destination
            .list_records(&ctx.entity.destination_full_path(), relation, after_id, limit)
            .map_err(|e| store_error(&e))?;

        let page_info = match (rows.last(), self.relations.get(index + 1)) {
            (Some(last), _) if rows.len() == limit => {
                PageInfo::next(format!("{relation}:{}", last.id))
            }
            (_, Some(next_relation)) => PageInfo::next(format!("{next_relation}:0")),
            (_, None) => PageInfo::last(),
        };
        let records = rows
            .into_iter()
            .map(|row| Record::new(row.data).with_target(relation.clone(), row.key))
            .collect();
        Ok(ExtractedData::new(records, page_info))
    }
}
