use std::collections::BTreeMap;

use ferry_types::error::MigrationError;
use ferry_types::page::Record;
use serde_json::{Map, Value};

use super::object_mut;
use crate::context::PipelineContext;
use crate::pipeline::Transformer;

/// Renames, drops and defaults top-level fields, in that order.
#[derive(Debug, Clone, Default)]
pub struct FieldRulesTransformer {
    rename: BTreeMap<String, String>,
    drop: Vec<String>,
    defaults: Map<String, Value>,
}

impl FieldRulesTransformer {
    #[must_use]
    pub fn new(
        rename: BTreeMap<String, String>,
        drop: Vec<String>,
        defaults: Map<String, Value>,
    ) -> Self {
        Self {
            rename,
            drop,
            defaults,
        }
    }
}

impl Transformer for FieldRulesTransformer {
    fn name(&self) -> &'static str {
        "field_rules"
    }

    fn transform(&self, _ctx: &PipelineContext, mut record: Record) -> Result<Record, MigrationError> {
        let data = object_mut(&mut record, self.name())?;

        for (from, to) in &self.rename {
            if let Some(value) = data.remove(from) {
                data.insert(to.clone(), value);
            }
        }
        for field in &self.drop {
            data.remove(field);
        }
        for (field, default) in &self.defaults {
            match data.get(field) {
                Some(Value::Null) | None => {
                    data.insert(field.clone(), default.clone());
                }
                Some(_) => {}
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use serde_json::json;

    #[test]
    fn rename_drop_then_default() {
        let env = TestEnv::fallback();
        let ctx = env.context("milestones");
        let transformer = FieldRulesTransformer::new(
            BTreeMap::from([("state".to_string(), "status".to_string())]),
            vec!["internal".to_string()],
            json!({"status": "active", "visibility": "private"})
                .as_object()
                .cloned()
                .unwrap(),
        );

        let out = transformer
            .transform(
                &ctx,
                Record::new(json!({"state": "closed", "internal": true, "visibility": null})),
            )
            .unwrap();
        assert_eq!(out.data, json!({"status": "closed", "visibility": "private"}));
    }
}
