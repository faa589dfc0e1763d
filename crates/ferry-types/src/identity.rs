//! Identity mapping types.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::tracker::PipelineKind;

/// User identifier on the source instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceUserId(i64);

impl SourceUserId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SourceUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier on the destination instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationUserId(i64);

impl DestinationUserId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for DestinationUserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of mapping one source user reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "user_id")]
pub enum UserRef {
    /// Mapped to a known destination user.
    Resolved(DestinationUserId),
    /// Left for asynchronous reconciliation.
    Deferred(SourceUserId),
}

/// A user field that could not be resolved while transforming a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredUser {
    pub field: String,
    pub source_user_id: SourceUserId,
}

/// A destination record field waiting for its real user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderReference {
    pub entity_id: EntityId,
    pub pipeline_kind: PipelineKind,
    pub relation: String,
    pub record_key: String,
    pub field: String,
    pub source_user_id: SourceUserId,
    /// Destination user currently standing in for the source user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder_user_id: Option<DestinationUserId>,
}
