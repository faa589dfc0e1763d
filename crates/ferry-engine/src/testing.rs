//! Shared fixtures for unit tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ferry_state::{SqliteDestinationStore, SqliteStateBackend, StateBackend};
use ferry_types::entity::{EntityKind, NewEntity};
use ferry_types::error::MigrationError;
use ferry_types::identity::DestinationUserId;
use ferry_types::page::ExtractedData;
use ferry_types::tracker::PipelineKind;
use reqwest::Url;
use tempfile::TempDir;

use crate::context::{ArchiveLimits, MigrationRun, PipelineContext, RunSettings};
use crate::identity::{IdentityCache, MappingMode};
use crate::references::RouteTable;
use crate::source::{PageRequest, SourceClient};
use crate::url_guard::UrlGuard;

/// Source that has nothing to offer.
pub(crate) struct NullSource;

#[async_trait]
impl SourceClient for NullSource {
    async fn fetch_page(&self, _request: &PageRequest<'_>) -> Result<ExtractedData, MigrationError> {
        Ok(ExtractedData::empty())
    }

    async fn download_url(
        &self,
        _entity_path: &str,
        _entity_kind: EntityKind,
        _relation: &str,
    ) -> Result<Url, MigrationError> {
        Err(MigrationError::internal("NO_DOWNLOADS", "null source"))
    }

    async fn download(&self, _url: &Url, _dest: &Path, _max_bytes: u64) -> Result<u64, MigrationError> {
        Err(MigrationError::internal("NO_DOWNLOADS", "null source"))
    }
}

pub(crate) fn settings(mapping: MappingMode) -> RunSettings {
    RunSettings {
        migration: "test".into(),
        source_url: Url::parse("https://source.example.com").unwrap(),
        destination_url: Url::parse("https://dest.example.com").unwrap(),
        page_size: 10,
        max_retries: 0,
        mapping,
        url_guard: UrlGuard::new(false, &[]),
        archive_limits: ArchiveLimits::default(),
        routes: RouteTable::default(),
        failure_summary_limit: 5,
        parallelism: 2,
    }
}

pub(crate) struct TestEnv {
    pub _dir: TempDir,
    pub state: Arc<SqliteStateBackend>,
    pub destination: Arc<SqliteDestinationStore>,
    pub run: Arc<MigrationRun>,
}

impl TestEnv {
    pub(crate) fn new(mapping: MappingMode, identities: IdentityCache) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(SqliteStateBackend::in_memory().unwrap());
        let destination = Arc::new(SqliteDestinationStore::in_memory(dir.path()).unwrap());
        let run = Arc::new(
            MigrationRun::new(
                settings(mapping),
                Arc::new(NullSource),
                destination.clone(),
                state.clone(),
            )
            .with_identities(identities),
        );
        Self {
            _dir: dir,
            state,
            destination,
            run,
        }
    }

    pub(crate) fn fallback() -> Self {
        Self::new(
            MappingMode::Fallback(DestinationUserId::new(1)),
            IdentityCache::default(),
        )
    }

    /// Context for a project `acme/widgets` migrating to `imported/widgets`.
    pub(crate) fn context(&self, pipeline: &str) -> PipelineContext {
        let entity = self
            .state
            .create_entity(&NewEntity {
                migration: "test".into(),
                kind: EntityKind::Project,
                source_full_path: "acme/widgets".into(),
                destination_slug: "widgets".into(),
                destination_namespace: "imported".into(),
                parent_id: None,
                organization_id: None,
            })
            .unwrap()
            .entity;
        PipelineContext::resume(Arc::clone(&self.run), entity, &PipelineKind::new(pipeline), 1)
            .unwrap()
    }
}
