//! Loader implementations, selected by [`LoaderSpec`](crate::catalog::LoaderSpec) tag.
//!
//! Every loader is idempotent: replaying a page after a crash between load
//! and cursor persistence must not duplicate destination objects.

mod bundle;
mod child_entities;
mod namespace;
mod record;

use ferry_types::error::MigrationError;
use ferry_types::page::Record;
use serde_json::Value;

pub use bundle::BundleLoader;
pub use child_entities::ChildEntitiesLoader;
pub use namespace::NamespaceLoader;
pub use record::{ChangedRecordLoader, RecordLoader};

/// String form of a scalar field, for use as a record key.
fn key_field(record: &Record, field: &str) -> Result<String, MigrationError> {
    match record.data.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(MigrationError::data(
            "MISSING_KEY",
            format!("record has no usable '{field}' field"),
        )),
    }
}
