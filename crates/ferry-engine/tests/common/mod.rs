//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ferry_engine::context::{ArchiveLimits, MigrationRun, PipelineContext, RunSettings};
use ferry_engine::identity::MappingMode;
use ferry_engine::references::RouteTable;
use ferry_engine::source::{PageRequest, SourceClient};
use ferry_engine::url_guard::UrlGuard;
use ferry_state::{SqliteDestinationStore, SqliteStateBackend, StateBackend};
use ferry_types::entity::{Entity, EntityKind, NewEntity};
use ferry_types::error::{MigrationError, SIZE_LIMIT};
use ferry_types::identity::DestinationUserId;
use ferry_types::page::{ExtractedData, PageInfo, Record};
use ferry_types::tracker::PipelineKind;
use reqwest::Url;
use serde_json::json;
use tempfile::TempDir;

pub const SOURCE_HOST: &str = "source.example.com";

type PageKey = (String, String, Option<String>);

/// Scripted source. Unscripted pages are empty; each key can queue several
/// responses, the last of which repeats.
#[derive(Default)]
pub struct MockSource {
    pages: Mutex<HashMap<PageKey, Vec<Result<ExtractedData, MigrationError>>>>,
    archives: Mutex<HashMap<String, Vec<u8>>>,
    download_urls: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn page(&self, entity: &str, relation: &str, cursor: Option<&str>, data: ExtractedData) {
        self.push(entity, relation, cursor, Ok(data));
    }

    pub fn fail(&self, entity: &str, relation: &str, cursor: Option<&str>, err: MigrationError) {
        self.push(entity, relation, cursor, Err(err));
    }

    fn push(
        &self,
        entity: &str,
        relation: &str,
        cursor: Option<&str>,
        response: Result<ExtractedData, MigrationError>,
    ) {
        self.pages
            .lock()
            .unwrap()
            .entry((entity.into(), relation.into(), cursor.map(str::to_owned)))
            .or_default()
            .push(response);
    }

    /// Serve `bytes` for every download of `relation`.
    pub fn archive(&self, relation: &str, bytes: Vec<u8>) {
        self.archives.lock().unwrap().insert(relation.into(), bytes);
    }

    /// Override the export URL handed out for `relation`.
    pub fn download_url_for(&self, relation: &str, url: &str) {
        self.download_urls
            .lock()
            .unwrap()
            .insert(relation.into(), url.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetches(&self, relation: &str) -> usize {
        let prefix = format!("fetch {relation} ");
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn downloads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("download "))
            .count()
    }
}

#[async_trait]
impl SourceClient for MockSource {
    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<ExtractedData, MigrationError> {
        self.calls.lock().unwrap().push(format!(
            "fetch {} {} {}",
            request.relation,
            request.entity_path,
            request.cursor.unwrap_or("-")
        ));
        let key = (
            request.entity_path.to_string(),
            request.relation.to_string(),
            request.cursor.map(str::to_owned),
        );
        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue[0].clone(),
            None => Ok(ExtractedData::empty()),
        }
    }

    async fn download_url(
        &self,
        entity_path: &str,
        _entity_kind: EntityKind,
        relation: &str,
    ) -> Result<Url, MigrationError> {
        let raw = self
            .download_urls
            .lock()
            .unwrap()
            .get(relation)
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "https://{SOURCE_HOST}/api/v4/projects/{}/export_relations/download?relation={relation}",
                    entity_path.replace('/', "%2F")
                )
            });
        Url::parse(&raw).map_err(|e| MigrationError::data("BAD_URL", e.to_string()))
    }

    async fn download(&self, url: &Url, dest: &Path, max_bytes: u64) -> Result<u64, MigrationError> {
        self.calls.lock().unwrap().push(format!("download {url}"));
        let relation = url
            .query_pairs()
            .find(|(k, _)| k == "relation")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let bytes = self
            .archives
            .lock()
            .unwrap()
            .get(&relation)
            .cloned()
            .ok_or_else(|| MigrationError::transport("HTTP_404", "no such export", false))?;
        if bytes.len() as u64 > max_bytes {
            return Err(MigrationError::security(SIZE_LIMIT, "download too large"));
        }
        std::fs::write(dest, &bytes)
            .map_err(|e| MigrationError::internal("SCRATCH_IO", e.to_string()))?;
        Ok(bytes.len() as u64)
    }
}

pub fn settings(mapping: MappingMode) -> RunSettings {
    RunSettings {
        migration: "test".into(),
        source_url: Url::parse(&format!("https://{SOURCE_HOST}")).unwrap(),
        destination_url: Url::parse("https://dest.example.com").unwrap(),
        page_size: 5,
        max_retries: 0,
        mapping,
        url_guard: UrlGuard::new(false, &[SOURCE_HOST.to_string()]),
        archive_limits: ArchiveLimits::default(),
        routes: RouteTable::default(),
        failure_summary_limit: 5,
        parallelism: 2,
    }
}

pub fn fallback_settings() -> RunSettings {
    settings(MappingMode::Fallback(DestinationUserId::new(1)))
}

/// In-memory stores and a scripted source.
pub struct Harness {
    pub dir: TempDir,
    pub state: Arc<SqliteStateBackend>,
    pub destination: Arc<SqliteDestinationStore>,
    pub source: Arc<MockSource>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let destination =
            Arc::new(SqliteDestinationStore::in_memory(&dir.path().join("content")).unwrap());
        Self {
            dir,
            state: Arc::new(SqliteStateBackend::in_memory().unwrap()),
            destination,
            source: Arc::new(MockSource::default()),
        }
    }

    pub fn run(&self, settings: RunSettings) -> Arc<MigrationRun> {
        Arc::new(MigrationRun::new(
            settings,
            self.source.clone(),
            self.destination.clone(),
            self.state.clone(),
        ))
    }

    /// Register project `acme/widgets` → `imported/widgets`.
    pub fn project(&self) -> Entity {
        self.state
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
            .entity
    }

    pub fn context(&self, run: &Arc<MigrationRun>, entity: &Entity, kind: &str) -> PipelineContext {
        PipelineContext::resume(Arc::clone(run), entity.clone(), &PipelineKind::new(kind), 1)
            .unwrap()
    }
}

/// Issue-shaped records with consecutive iids.
pub fn issues(iids: std::ops::RangeInclusive<i64>) -> Vec<Record> {
    iids.map(|iid| Record::new(json!({"iid": iid, "title": format!("Issue {iid}")})))
        .collect()
}

pub fn page(records: Vec<Record>, next: Option<&str>) -> ExtractedData {
    ExtractedData::new(records, next.map_or_else(PageInfo::last, PageInfo::next))
}

/// A gzipped tar holding regular files.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    ));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
