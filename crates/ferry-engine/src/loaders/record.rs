use ferry_types::error::MigrationError;
use ferry_types::page::Record;

use super::key_field;
use crate::context::PipelineContext;
use crate::errors::store_error;
use crate::pipeline::{LoadOutcome, Loader};

/// Upserts records of one relation keyed by a record field. Records equal
/// to what is stored are not written again.
#[derive(Debug, Clone)]
pub struct RecordLoader {
    relation: String,
    key: String,
}

impl RecordLoader {
    #[must_use]
    pub fn new(relation: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            key: key.into(),
        }
    }
}

impl Loader for RecordLoader {
    fn load(&self, ctx: &PipelineContext, record: &Record) -> Result<LoadOutcome, MigrationError> {
        let key = key_field(record, &self.key)?;
        let full_path = ctx.entity.destination_full_path();
        let destination = &ctx.run.destination;

        let existing = destination
            .find_record(&full_path, &self.relation, &key)
            .map_err(|e| store_error(&e))?;
        Ok(match existing {
            Some(stored) if stored == record.data => LoadOutcome::Unchanged,
            Some(_) => {
                destination
                    .save_record(&full_path, &self.relation, &key, &record.data)
                    .map_err(|e| store_error(&e))?;
                LoadOutcome::Updated
            }
            None => {
                destination
                    .save_record(&full_path, &self.relation, &key, &record.data)
                    .map_err(|e| store_error(&e))?;
                LoadOutcome::Created
            }
        })
    }

    fn placeholder_slot(&self, record: &Record) -> Option<(String, String)> {
        key_field(record, &self.key)
            .ok()
            .map(|key| (self.relation.clone(), key))
    }
}

/// Writes a re-read record back to its slot only when the transformer
/// chain changed it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangedRecordLoader;

impl Loader for ChangedRecordLoader {
    fn load(&self, ctx: &PipelineContext, record: &Record) -> Result<LoadOutcome, MigrationError> {
        let Some(target) = &record.target else {
            return Err(MigrationError::internal(
                "MISSING_TARGET",
                "changed-record loader needs a record target",
            ));
        };
        let full_path = ctx.entity.destination_full_path();
        let destination = &ctx.run.destination;

        let stored = destination
            .find_record(&full_path, &target.relation, &target.key)
            .map_err(|e| store_error(&e))?;
        if stored.as_ref() == Some(&record.data) {
            return Ok(LoadOutcome::Unchanged);
        }
        destination
            .save_record(&full_path, &target.relation, &target.key, &record.data)
            .map_err(|e| store_error(&e))?;
        Ok(LoadOutcome::Updated)
    }

    fn placeholder_slot(&self, record: &Record) -> Option<(String, String)> {
        record
            .target
            .as_ref()
            .map(|target| (target.relation.clone(), target.key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use ferry_state::DestinationStore;
    use serde_json::json;

    #[test]
    fn upsert_is_idempotent() {
        let env = TestEnv::fallback();
        let ctx = env.context("issues");
        let loader = RecordLoader::new("issues", "iid");
        let record = Record::new(json!({"iid": 7, "title": "Bug"}));

        assert_eq!(loader.load(&ctx, &record).unwrap(), LoadOutcome::Created);
        assert_eq!(loader.load(&ctx, &record).unwrap(), LoadOutcome::Unchanged);
        let changed = Record::new(json!({"iid": 7, "title": "Bug!"}));
        assert_eq!(loader.load(&ctx, &changed).unwrap(), LoadOutcome::Updated);
        assert_eq!(
            env.destination
                .list_records("imported/widgets", "issues", 0, 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn missing_key_is_record_level_error() {
        let env = TestEnv::fallback();
        let ctx = env.context("issues");
        let err = RecordLoader::new("issues", "iid")
            .load(&ctx, &Record::new(json!({"title": "x"})))
            .unwrap_err();
        assert_eq!(err.code, "MISSING_KEY");
        assert!(!err.aborts_tracker());
    }

    #[test]
    fn placeholder_slots_follow_the_record_key() {
        let record = Record::new(json!({"iid": 5}));
        assert_eq!(
            RecordLoader::new("issues", "iid").placeholder_slot(&record),
            Some(("issues".to_string(), "5".to_string()))
        );
        assert_eq!(ChangedRecordLoader.placeholder_slot(&record), None);
        let targeted = record.with_target("notes", "n1");
        assert_eq!(
            ChangedRecordLoader.placeholder_slot(&targeted),
            Some(("notes".to_string(), "n1".to_string()))
        );
    }

    #[test]
    fn changed_record_saves_only_differences() {
        let env = TestEnv::fallback();
        let ctx = env.context("references");
        env.destination
            .save_record("imported/widgets", "notes", "3", &json!({"note": "a"}))
            .unwrap();

        let same = Record::new(json!({"note": "a"})).with_target("notes", "3");
        assert_eq!(ChangedRecordLoader.load(&ctx, &same).unwrap(), LoadOutcome::Unchanged);

        let changed = Record::new(json!({"note": "b"})).with_target("notes", "3");
        assert_eq!(ChangedRecordLoader.load(&ctx, &changed).unwrap(), LoadOutcome::Updated);
        assert_eq!(
            env.destination
                .find_record("imported/widgets", "notes", "3")
                .unwrap(),
            Some(json!({"note": "b"}))
        );
    }
}
