//! Turns a validated [`MigrationConfig`] into live stores, clients and run
//! settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_state::{DestinationStore, SqliteDestinationStore, SqliteStateBackend, StateBackend};
use ferry_types::entity::NewEntity;
use ferry_types::identity::DestinationUserId;
use reqwest::Url;

use crate::catalog::PipelineRegistry;
use crate::config::types::{parse_byte_size, MigrationConfig, StateBackendKind};
use crate::context::{ArchiveLimits, RunSettings};
use crate::identity::MappingMode;
use crate::references::RouteTable;
use crate::source::{HttpSourceClient, SourceClient};
use crate::url_guard::UrlGuard;

fn ferry_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ferry")
}

pub fn create_state_backend(config: &MigrationConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.state.connection {
                SqliteStateBackend::open(Path::new(path)).context("Failed to open state DB")?
            } else {
                let state_path = ferry_home().join("state.db");
                SqliteStateBackend::open(&state_path)
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

pub fn create_destination_store(config: &MigrationConfig) -> Result<Arc<dyn DestinationStore>> {
    let store_path = config
        .destination
        .store
        .as_ref()
        .map_or_else(|| ferry_home().join("destination.db"), PathBuf::from);
    let content_dir = config
        .destination
        .content_dir
        .as_ref()
        .map_or_else(|| ferry_home().join("content"), PathBuf::from);
    let store = SqliteDestinationStore::open(&store_path, &content_dir).with_context(|| {
        format!("Failed to open destination store {}", store_path.display())
    })?;
    Ok(Arc::new(store) as Arc<dyn DestinationStore>)
}

pub fn url_guard(config: &MigrationConfig) -> UrlGuard {
    UrlGuard::new(
        config.network.allow_local_network,
        &config.network.allowed_hosts,
    )
}

pub fn create_source_client(config: &MigrationConfig) -> Result<Arc<dyn SourceClient>> {
    let base = Url::parse(&config.source.url).context("Invalid source url")?;
    let client = HttpSourceClient::new(
        base,
        config.source.token.clone(),
        Duration::from_secs(config.source.timeout_seconds),
        url_guard(config),
    )
    .context("Failed to build source HTTP client")?;
    Ok(Arc::new(client) as Arc<dyn SourceClient>)
}

/// Resolve the knobs every pipeline of the run reads.
pub fn run_settings(config: &MigrationConfig) -> Result<RunSettings> {
    let mapping = if config.users.mapping {
        MappingMode::Placeholders {
            placeholder_user: config.users.fallback_user_id.map(DestinationUserId::new),
        }
    } else {
        let id = config
            .users
            .fallback_user_id
            .context("users.fallback_user_id is required when users.mapping is disabled")?;
        MappingMode::Fallback(DestinationUserId::new(id))
    };

    Ok(RunSettings {
        migration: config.migration.clone(),
        source_url: Url::parse(&config.source.url).context("Invalid source url")?,
        destination_url: Url::parse(&config.destination.url)
            .context("Invalid destination url")?,
        page_size: config.source.page_size,
        max_retries: config.resources.max_retries,
        mapping,
        url_guard: url_guard(config),
        archive_limits: ArchiveLimits {
            max_download_bytes: parse_byte_size(&config.network.max_download_size)?,
            max_decompressed_bytes: parse_byte_size(&config.network.max_decompressed_size)?,
        },
        routes: RouteTable::default(),
        failure_summary_limit: config.resources.failure_summary_limit,
        parallelism: usize::try_from(config.resources.parallelism.max(1)).unwrap_or(1),
    })
}

pub fn pipeline_registry(config: &MigrationConfig) -> PipelineRegistry {
    config
        .catalog
        .clone()
        .map_or_else(PipelineRegistry::builtin, PipelineRegistry::new)
}

/// Top-level entities named in the config.
pub fn top_level_entities(config: &MigrationConfig) -> Vec<NewEntity> {
    config
        .entities
        .iter()
        .map(|e| NewEntity {
            migration: config.migration.clone(),
            kind: e.source_type,
            source_full_path: e.source_full_path.trim_matches('/').to_string(),
            destination_slug: e.destination_slug.clone(),
            destination_namespace: e.destination_namespace.trim_matches('/').to_string(),
            parent_id: None,
            organization_id: None,
        })
        .collect()
}

pub(crate) fn check_state_backend(config: &MigrationConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!("State backend: FAILED: {e:#}");
            false
        }
    }
}

pub(crate) fn check_destination_store(config: &MigrationConfig) -> bool {
    match create_destination_store(config) {
        Ok(_) => {
            tracing::info!("Destination store: OK");
            true
        }
        Err(e) => {
            tracing::error!("Destination store: FAILED: {e:#}");
            false
        }
    }
}
