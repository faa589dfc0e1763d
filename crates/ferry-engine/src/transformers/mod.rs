//! Transformer implementations, selected by [`TransformerSpec`](crate::catalog::TransformerSpec) tag.

mod field_rules;
mod prohibited;
mod references;
mod user_references;

use ferry_types::error::MigrationError;
use ferry_types::page::Record;
use serde_json::{Map, Value};

pub use field_rules::FieldRulesTransformer;
pub use prohibited::ProhibitedAttributesTransformer;
pub use references::ReferencesTransformer;
pub use user_references::UserReferencesTransformer;

/// The record's data as a JSON object.
fn object_mut<'r>(
    record: &'r mut Record,
    transformer: &str,
) -> Result<&'r mut Map<String, Value>, MigrationError> {
    record.data.as_object_mut().ok_or_else(|| {
        MigrationError::data(
            "INVALID_RECORD",
            format!("{transformer}: expected a JSON object record"),
        )
    })
}
