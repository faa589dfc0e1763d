use ferry_types::error::MigrationError;
use ferry_types::identity::{DeferredUser, SourceUserId, UserRef};
use ferry_types::page::Record;
use serde_json::Value;

use super::object_mut;
use crate::context::PipelineContext;
use crate::identity::{IdentityMapper, MappingMode};
use crate::pipeline::Transformer;

/// Maps source user ids in the named fields to destination users.
///
/// Never fails on identity: unresolved users are deferred (placeholder
/// mode) or attributed to the fallback user.
#[derive(Debug, Clone)]
pub struct UserReferencesTransformer {
    fields: Vec<String>,
}

impl UserReferencesTransformer {
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

fn map_user(
    mapper: &IdentityMapper<'_>,
    field: &str,
    value: &mut Value,
    deferred: &mut Vec<DeferredUser>,
) {
    let Some(source_id) = value.as_i64() else {
        return;
    };
    *value = match mapper.map(SourceUserId::new(source_id)) {
        UserRef::Resolved(user) => Value::from(user.get()),
        UserRef::Deferred(source_user_id) => {
            deferred.push(DeferredUser {
                field: field.to_string(),
                source_user_id,
            });
            match mapper.mode() {
                MappingMode::Placeholders {
                    placeholder_user: Some(user),
                } => Value::from(user.get()),
                _ => Value::Null,
            }
        }
    };
}

impl Transformer for UserReferencesTransformer {
    fn name(&self) -> &'static str {
        "user_references"
    }

    fn transform(&self, ctx: &PipelineContext, mut record: Record) -> Result<Record, MigrationError> {
        let mapper = ctx.identity_mapper();
        let mut deferred = Vec::new();
        let data = object_mut(&mut record, self.name())?;

        for field in &self.fields {
            match data.get_mut(field) {
                Some(Value::Array(items)) => {
                    for item in items {
                        map_user(&mapper, field, item, &mut deferred);
                    }
                }
                Some(value) => map_user(&mapper, field, value, &mut deferred),
                None => {}
            }
        }

        record.deferred_users.extend(deferred);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityCache;
    use crate::testing::TestEnv;
    use ferry_types::identity::DestinationUserId;
    use serde_json::json;

    fn cache() -> IdentityCache {
        let mut builder = IdentityCache::builder();
        builder.insert(SourceUserId::new(5), DestinationUserId::new(105));
        builder.freeze()
    }

    fn transformer() -> UserReferencesTransformer {
        UserReferencesTransformer::new(vec!["author_id".into(), "assignee_ids".into()])
    }

    #[test]
    fn placeholder_mode_defers_unknown_users() {
        let env = TestEnv::new(
            MappingMode::Placeholders {
                placeholder_user: None,
            },
            cache(),
        );
        let ctx = env.context("issues");
        let out = transformer()
            .transform(
                &ctx,
                Record::new(json!({"author_id": 5, "assignee_ids": [5, 6], "title": "t"})),
            )
            .unwrap();

        assert_eq!(out.data, json!({"author_id": 105, "assignee_ids": [105, null], "title": "t"}));
        assert_eq!(
            out.deferred_users,
            vec![DeferredUser {
                field: "assignee_ids".into(),
                source_user_id: SourceUserId::new(6),
            }]
        );
    }

    #[test]
    fn placeholder_user_fills_deferred_fields() {
        let env = TestEnv::new(
            MappingMode::Placeholders {
                placeholder_user: Some(DestinationUserId::new(999)),
            },
            cache(),
        );
        let ctx = env.context("issues");
        let out = transformer()
            .transform(&ctx, Record::new(json!({"author_id": 7})))
            .unwrap();
        assert_eq!(out.data, json!({"author_id": 999}));
        assert_eq!(out.deferred_users.len(), 1);
    }

    #[test]
    fn fallback_mode_records_no_placeholders() {
        let env = TestEnv::new(MappingMode::Fallback(DestinationUserId::new(1)), cache());
        let ctx = env.context("issues");
        let out = transformer()
            .transform(&ctx, Record::new(json!({"author_id": 7, "assignee_ids": null})))
            .unwrap();
        assert_eq!(out.data, json!({"author_id": 1, "assignee_ids": null}));
        assert!(out.deferred_users.is_empty());
    }
}
