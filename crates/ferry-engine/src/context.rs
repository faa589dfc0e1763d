//! Run-scoped and tracker-scoped execution context.
//!
//! A [`MigrationRun`] is shared by every pipeline of one migration: clients,
//! stores, settings and the frozen identity cache. A [`PipelineContext`] is
//! rebuilt from the persisted tracker each time a pipeline starts and owns
//! that tracker's private scratch directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_state::{DestinationStore, StateBackend};
use ferry_types::entity::Entity;
use ferry_types::error::MigrationError;
use ferry_types::tracker::{PipelineKind, Tracker};
use reqwest::Url;
use tempfile::TempDir;

use crate::errors::EngineError;
use crate::identity::{IdentityCache, IdentityMapper, MappingMode};
use crate::references::{RewriteRule, RouteTable};
use crate::source::SourceClient;
use crate::url_guard::UrlGuard;

/// Size caps applied while staging archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_download_bytes: u64,
    pub max_decompressed_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_download_bytes: 5 * 1024 * 1024 * 1024,
            max_decompressed_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

/// Resolved, validated settings for one migration run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub migration: String,
    pub source_url: Url,
    pub destination_url: Url,
    pub page_size: u32,
    pub max_retries: u32,
    pub mapping: MappingMode,
    pub url_guard: UrlGuard,
    pub archive_limits: ArchiveLimits,
    pub routes: RouteTable,
    pub failure_summary_limit: usize,
    pub parallelism: usize,
}

/// Everything shared by the pipelines of one migration run.
pub struct MigrationRun {
    pub settings: RunSettings,
    pub source: Arc<dyn SourceClient>,
    pub destination: Arc<dyn DestinationStore>,
    pub state: Arc<dyn StateBackend>,
    pub identities: Arc<IdentityCache>,
}

impl MigrationRun {
    #[must_use]
    pub fn new(
        settings: RunSettings,
        source: Arc<dyn SourceClient>,
        destination: Arc<dyn DestinationStore>,
        state: Arc<dyn StateBackend>,
    ) -> Self {
        Self {
            settings,
            source,
            destination,
            state,
            identities: Arc::new(IdentityCache::default()),
        }
    }

    /// Replace the identity cache. Only called before pipelines run.
    #[must_use]
    pub fn with_identities(mut self, identities: IdentityCache) -> Self {
        self.identities = Arc::new(identities);
        self
    }
}

/// Context for one (entity, pipeline kind) execution.
pub struct PipelineContext {
    pub run: Arc<MigrationRun>,
    pub entity: Entity,
    pub tracker: Tracker,
    scratch: Option<TempDir>,
}

impl PipelineContext {
    /// Load or create the tracker for `kind` and build a fresh context.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the state backend fails.
    pub fn resume(
        run: Arc<MigrationRun>,
        entity: Entity,
        kind: &PipelineKind,
        stage: u32,
    ) -> Result<Self, EngineError> {
        let tracker = run.state.get_or_create_tracker(entity.id, kind, stage)?;
        Ok(Self {
            run,
            entity,
            tracker,
            scratch: None,
        })
    }

    /// The tracker's private scratch directory, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the directory cannot be created.
    pub fn scratch_dir(&mut self) -> Result<&Path, MigrationError> {
        if self.scratch.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("ferry-")
                .tempdir()
                .map_err(|e| {
                    MigrationError::internal("SCRATCH_IO", format!("creating scratch dir: {e}"))
                })?;
            tracing::debug!(
                tracker = %self.tracker.id,
                path = %dir.path().display(),
                "Created scratch directory"
            );
            self.scratch = Some(dir);
        }
        match &self.scratch {
            Some(dir) => Ok(dir.path()),
            None => Err(MigrationError::internal(
                "SCRATCH_IO",
                "scratch directory missing",
            )),
        }
    }

    /// Path of the scratch directory if one exists.
    #[must_use]
    pub fn scratch_path(&self) -> Option<PathBuf> {
        self.scratch.as_ref().map(|dir| dir.path().to_path_buf())
    }

    /// Delete the scratch directory. Safe to call when none exists.
    pub fn release_scratch(&mut self) {
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }

    #[must_use]
    pub fn identity_mapper(&self) -> IdentityMapper<'_> {
        IdentityMapper::new(&self.run.identities, self.run.settings.mapping)
    }

    /// Reference rewrite rule for this entity.
    #[must_use]
    pub fn rewrite_rule<'a>(&'a self, destination_path: &'a str) -> RewriteRule<'a> {
        RewriteRule {
            source_base: &self.run.settings.source_url,
            destination_base: &self.run.settings.destination_url,
            source_path: &self.entity.source_full_path,
            destination_path: destination_path.trim_matches('/'),
            routes: &self.run.settings.routes,
        }
    }
}

impl Drop for PipelineContext {
    fn drop(&mut self) {
        self.release_scratch();
    }
}
