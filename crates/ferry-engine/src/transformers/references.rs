use std::borrow::Cow;

use ferry_types::error::MigrationError;
use ferry_types::page::Record;
use serde_json::Value;

use super::object_mut;
use crate::context::PipelineContext;
use crate::pipeline::Transformer;
use crate::references::{render_html, rewrite_references};

/// Rewrites source links in free-text fields and keeps the cached HTML
/// (`{field}_html`) in step with the rewritten text.
#[derive(Debug, Clone)]
pub struct ReferencesTransformer {
    fields: Vec<String>,
}

impl ReferencesTransformer {
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Transformer for ReferencesTransformer {
    fn name(&self) -> &'static str {
        "references"
    }

    fn transform(&self, ctx: &PipelineContext, mut record: Record) -> Result<Record, MigrationError> {
        let destination_path = ctx.entity.destination_full_path();
        let rule = ctx.rewrite_rule(&destination_path);
        let destination = &ctx.run.destination;
        let exists = |relation: &str, key: &str| {
            match destination.find_record(&destination_path, relation, key) {
                Ok(found) => found.is_some(),
                Err(e) => {
                    tracing::debug!(relation, key, error = %e, "Reference lookup failed, leaving link");
                    false
                }
            }
        };

        let data = object_mut(&mut record, self.name())?;
        let system = data.get("system").and_then(Value::as_bool).unwrap_or(false);

        for field in &self.fields {
            let Some(Value::String(text)) = data.get(field) else {
                continue;
            };
            let Cow::Owned(rewritten) = rewrite_references(text, &rule, exists) else {
                continue;
            };

            let html_field = format!("{field}_html");
            if system || data.contains_key(&html_field) {
                data.insert(html_field, Value::String(render_html(&rewritten)));
            }
            data.insert(field.clone(), Value::String(rewritten));
        }
        Ok(record)
    }
}
