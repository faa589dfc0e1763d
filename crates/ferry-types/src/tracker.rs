//! Per (entity, pipeline kind) progress records.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::page::PageInfo;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a relation pipeline (e.g. `"issues"`, `"repository"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineKind(String);

impl PipelineKind {
    /// Create a new pipeline kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for PipelineKind {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Row identifier of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerId(i64);

impl TrackerId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TrackerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Created,
    Started,
    Finished,
    Failed,
    Skipped,
    Canceled,
}

impl TrackerStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "started" => Some(Self::Started),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Re-running a tracker in this state does nothing.
    #[must_use]
    pub fn is_done(self) -> bool {
        matches!(self, Self::Finished | Self::Skipped)
    }

    /// Dependents of a tracker in this state must not run.
    #[must_use]
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Canceled)
    }
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Persisted progress of one pipeline for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub entity_id: EntityId,
    pub pipeline_kind: PipelineKind,
    pub stage: u32,
    pub status: TrackerStatus,
    /// Last durably persisted page boundary. `None` until the first page
    /// has been loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_info: Option<PageInfo>,
    pub seen_count: u64,
    pub imported_count: u64,
    /// ISO-8601 timestamp of the last update.
    pub updated_at: String,
}

impl Tracker {
    /// Cursor to request the next page with.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.page_info.as_ref().and_then(|p| p.next_page.as_deref())
    }

    /// All pages were loaded but the tracker was never marked finished
    /// (e.g. a crash right after the last cursor write).
    #[must_use]
    pub fn pages_exhausted(&self) -> bool {
        self.page_info.as_ref().is_some_and(|p| !p.has_next_page)
    }
}
