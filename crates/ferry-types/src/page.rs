//! Extracted page payloads.
//!
//! An [`ExtractedData`] lives for exactly one page: created by an extractor,
//! consumed by the transformer chain and loader, then dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::DeferredUser;

/// Continuation state returned with every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

impl PageInfo {
    /// Page info for a page followed by another.
    #[must_use]
    pub fn next(cursor: impl Into<String>) -> Self {
        Self {
            next_page: Some(cursor.into()),
            has_next_page: true,
        }
    }

    /// Page info for the final page.
    #[must_use]
    pub fn last() -> Self {
        Self::default()
    }
}

/// Where a record should be persisted on the destination.
///
/// Set by extractors that re-read destination data so loaders can write it
/// back to the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTarget {
    pub relation: String,
    pub key: String,
}

/// One raw or transformed record flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RecordTarget>,
    /// User references left for later reconciliation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred_users: Vec<DeferredUser>,
}

impl Record {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            target: None,
            deferred_users: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, relation: impl Into<String>, key: impl Into<String>) -> Self {
        self.target = Some(RecordTarget {
            relation: relation.into(),
            key: key.into(),
        });
        self
    }

    /// String value of a top-level field, if present.
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// A page of records and its continuation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub records: Vec<Record>,
    pub page_info: PageInfo,
}

impl ExtractedData {
    #[must_use]
    pub fn new(records: Vec<Record>, page_info: PageInfo) -> Self {
        Self { records, page_info }
    }

    /// A final page without records.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A final page holding one record.
    #[must_use]
    pub fn single(record: Record) -> Self {
        Self::new(vec![record], PageInfo::last())
    }

    #[must_use]
    pub fn has_next_page(&self) -> bool {
        self.page_info.has_next_page
    }
}
