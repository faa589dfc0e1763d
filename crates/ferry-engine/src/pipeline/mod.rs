//! Pipeline composition: one extractor, an ordered transformer chain and
//! one loader, bound to a pipeline kind.

mod runner;

use async_trait::async_trait;
use ferry_types::error::MigrationError;
use ferry_types::failure::PipelineStep;
use ferry_types::page::{ExtractedData, Record};
use ferry_types::tracker::PipelineKind;

use crate::context::PipelineContext;
use crate::errors::EngineError;

/// Produces pages of raw records.
///
/// Network-bound; the only async step of a pipeline.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch the page that follows `cursor` (`None` for the first page).
    async fn extract(
        &self,
        ctx: &mut PipelineContext,
        cursor: Option<&str>,
    ) -> Result<ExtractedData, EngineError>;

    /// Step recorded on failures raised by this extractor.
    fn step(&self) -> PipelineStep {
        PipelineStep::Extractor
    }
}

/// Rewrites one record. Errors skip the record, never the page.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns a record-level error; the record is not loaded.
    fn transform(&self, ctx: &PipelineContext, record: Record) -> Result<Record, MigrationError>;
}

/// What a loader did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Created,
    Updated,
    /// An equivalent object already existed; nothing was written.
    Unchanged,
    /// The record was intentionally not persisted.
    Skipped,
}

impl LoadOutcome {
    #[must_use]
    pub fn imported(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// Persists one transformed record, idempotently.
pub trait Loader: Send + Sync {
    /// # Errors
    ///
    /// Errors whose category aborts the tracker (security, transport) stop
    /// the pipeline; anything else is recorded against the record.
    fn load(&self, ctx: &PipelineContext, record: &Record) -> Result<LoadOutcome, MigrationError>;

    /// Destination `(relation, key)` that placeholder references for
    /// `record` point at. `None` for loaders that keep no per-record slot.
    fn placeholder_slot(&self, _record: &Record) -> Option<(String, String)> {
        None
    }
}

/// A runnable pipeline for one relation kind.
pub struct Pipeline {
    pub kind: PipelineKind,
    pub extractor: Box<dyn Extractor>,
    pub transformers: Vec<Box<dyn Transformer>>,
    pub loader: Box<dyn Loader>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind)
            .field(
                "transformers",
                &self.transformers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
