use std::collections::HashSet;
use std::sync::LazyLock;

use ferry_types::error::MigrationError;
use ferry_types::page::Record;
use regex::Regex;
use serde_json::Value;

use super::object_mut;
use crate::context::PipelineContext;
use crate::pipeline::Transformer;

/// Source-local identifiers, foreign keys, cached renderings and remote
/// URLs. None of these are meaningful on the destination.
static PROHIBITED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(id|.+_ids?|.+_html|cached_markdown_version|.+_url)$")
        .expect("valid prohibited attribute regex")
});

/// Strips prohibited attributes at every nesting level, except names on
/// the allow list.
#[derive(Debug, Clone, Default)]
pub struct ProhibitedAttributesTransformer {
    allow: HashSet<String>,
}

impl ProhibitedAttributesTransformer {
    #[must_use]
    pub fn new(allow: impl IntoIterator<Item = String>) -> Self {
        Self {
            allow: allow.into_iter().collect(),
        }
    }

    fn strip(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                map.retain(|key, _| self.allow.contains(key) || !PROHIBITED_RE.is_match(key));
                for nested in map.values_mut() {
                    self.strip(nested);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.strip(item);
                }
            }
            _ => {}
        }
    }
}

impl Transformer for ProhibitedAttributesTransformer {
    fn name(&self) -> &'static str {
        "prohibited_attributes"
    }

    fn transform(&self, _ctx: &PipelineContext, mut record: Record) -> Result<Record, MigrationError> {
        object_mut(&mut record, self.name())?;
        self.strip(&mut record.data);
        Ok(record)
    }
}
