//! Pipeline run results and operator-facing migration summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId, EntityStatus};
use crate::failure::Failure;
use crate::tracker::{PipelineKind, Tracker, TrackerId, TrackerStatus};

/// Record counts for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerCounts {
    /// Source records extracted.
    pub seen: u64,
    /// Records created or updated on the destination.
    pub imported: u64,
    /// Records skipped by the loader's idempotence check.
    pub unchanged: u64,
    /// Records that failed to transform or load.
    pub failed: u64,
}

impl TrackerCounts {
    pub fn merge(&mut self, other: &TrackerCounts) {
        self.seen += other.seen;
        self.imported += other.imported;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

/// Result of `Pipeline::run` for one tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerResult {
    pub tracker_id: TrackerId,
    pub pipeline_kind: PipelineKind,
    pub status: TrackerStatus,
    pub counts: TrackerCounts,
    /// Failures recorded during this run only.
    pub failures: Vec<Failure>,
}

/// Per-entity outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity_id: EntityId,
    pub source_full_path: String,
    pub destination_full_path: String,
    pub status: EntityStatus,
    pub finished: Vec<PipelineKind>,
    pub failed: Vec<PipelineKind>,
    pub skipped: Vec<PipelineKind>,
    pub canceled: Vec<PipelineKind>,
    /// First few failure messages per pipeline kind. Entity-level failures
    /// are keyed under `"entity"`.
    pub failures: BTreeMap<PipelineKind, Vec<String>>,
    pub security_failures: usize,
}

impl EntitySummary {
    /// Summarize an entity from its persisted trackers and failures, keeping
    /// at most `limit` messages per pipeline kind.
    #[must_use]
    pub fn build(entity: &Entity, trackers: &[Tracker], failures: &[Failure], limit: usize) -> Self {
        let mut summary = Self {
            entity_id: entity.id,
            source_full_path: entity.source_full_path.clone(),
            destination_full_path: entity.destination_full_path(),
            status: entity.status,
            finished: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            canceled: Vec::new(),
            failures: BTreeMap::new(),
            security_failures: 0,
        };

        for tracker in trackers {
            let bucket = match tracker.status {
                TrackerStatus::Finished => &mut summary.finished,
                TrackerStatus::Failed => &mut summary.failed,
                TrackerStatus::Skipped => &mut summary.skipped,
                TrackerStatus::Canceled => &mut summary.canceled,
                TrackerStatus::Created | TrackerStatus::Started => continue,
            };
            bucket.push(tracker.pipeline_kind.clone());
        }

        for failure in failures {
            if failure.is_security() {
                summary.security_failures += 1;
            }
            let kind = failure
                .pipeline_kind
                .clone()
                .unwrap_or_else(|| PipelineKind::new("entity"));
            let messages = summary.failures.entry(kind).or_default();
            if messages.len() < limit {
                messages.push(failure.summary_message());
            }
        }

        summary
    }
}

/// Outcome of a whole migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub entities: Vec<EntitySummary>,
}

impl MigrationSummary {
    #[must_use]
    pub fn failed_entities(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| e.status == EntityStatus::Failed)
            .count()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_entities() == 0
    }
}
