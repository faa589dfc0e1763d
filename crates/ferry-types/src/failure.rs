//! Recorded failures attached to entities and trackers.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::error::{summary_message, ErrorCategory, MigrationError};
use crate::tracker::{PipelineKind, TrackerId};

/// Pipeline step at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Extractor,
    Transformer,
    Loader,
    FileStager,
    Orchestrator,
}

impl PipelineStep {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extractor => "extractor",
            Self::Transformer => "transformer",
            Self::Loader => "loader",
            Self::FileStager => "file_stager",
            Self::Orchestrator => "orchestrator",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "extractor" => Some(Self::Extractor),
            "transformer" => Some(Self::Transformer),
            "loader" => Some(Self::Loader),
            "file_stager" => Some(Self::FileStager),
            "orchestrator" => Some(Self::Orchestrator),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure to be recorded. Belongs to a tracker or directly to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFailure {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<TrackerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_kind: Option<PipelineKind>,
    pub step: PipelineStep,
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    /// Key of the source record that failed, for record-level failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
}

impl NewFailure {
    /// Build a failure from a typed error.
    #[must_use]
    pub fn from_error(entity_id: EntityId, step: PipelineStep, err: &MigrationError) -> Self {
        Self {
            entity_id,
            tracker_id: None,
            pipeline_kind: None,
            step,
            category: err.category,
            code: err.code.clone(),
            message: err.message.clone(),
            record_key: None,
        }
    }

    #[must_use]
    pub fn for_tracker(mut self, tracker_id: TrackerId, kind: PipelineKind) -> Self {
        self.tracker_id = Some(tracker_id);
        self.pipeline_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn with_record_key(mut self, key: impl Into<String>) -> Self {
        self.record_key = Some(key.into());
        self
    }
}

/// A persisted failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub id: i64,
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_id: Option<TrackerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_kind: Option<PipelineKind>,
    pub step: PipelineStep,
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
    pub created_at: String,
}

impl Failure {
    #[must_use]
    pub fn is_security(&self) -> bool {
        self.category == ErrorCategory::Security
    }

    /// Message suitable for summaries: no internals, security failures
    /// clearly marked.
    #[must_use]
    pub fn summary_message(&self) -> String {
        summary_message(self.category, &self.code, &self.message)
    }
}
