//! Migration configuration types, deserialized from YAML.

use anyhow::{bail, Context, Result};
use ferry_types::entity::EntityKind;
use serde::Deserialize;

use crate::catalog::PipelineSpec;

/// Top-level migration document.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub version: String,
    pub migration: String,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    /// Replaces the built-in pipeline catalog when set.
    #[serde(default)]
    pub catalog: Option<Vec<PipelineSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub url: String,
    /// Path of the `SQLite` destination store.
    #[serde(default)]
    pub store: Option<String>,
    /// Directory imported bundles are copied into.
    #[serde(default)]
    pub content_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    #[serde(default)]
    pub connection: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub allow_local_network: bool,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_max_download_size")]
    pub max_download_size: String,
    #[serde(default = "default_max_decompressed_size")]
    pub max_decompressed_size: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allow_local_network: false,
            allowed_hosts: Vec::new(),
            max_download_size: default_max_download_size(),
            max_decompressed_size: default_max_decompressed_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersConfig {
    /// Record unresolved users as placeholder references instead of
    /// attributing them to the fallback user.
    #[serde(default)]
    pub mapping: bool,
    #[serde(default)]
    pub fallback_user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_failure_summary_limit")]
    pub failure_summary_limit: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_retries: default_max_retries(),
            failure_summary_limit: default_failure_summary_limit(),
        }
    }
}

/// A top-level entity to migrate.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub source_type: EntityKind,
    pub source_full_path: String,
    pub destination_slug: String,
    #[serde(default)]
    pub destination_namespace: String,
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_download_size() -> String {
    "5gb".to_string()
}

fn default_max_decompressed_size() -> String {
    "10gb".to_string()
}

fn default_parallelism() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_failure_summary_limit() -> usize {
    5
}

/// Parse a human byte size (`512`, `64kb`, `10mb`, `5gb`) into bytes.
///
/// # Errors
///
/// Returns an error for empty input, unknown suffixes or overflow.
pub fn parse_byte_size(raw: &str) -> Result<u64> {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        bail!("empty byte size");
    }

    let (digits, multiplier) = if let Some(n) = trimmed.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = trimmed.strip_suffix('b') {
        (n, 1)
    } else {
        (trimmed.as_str(), 1)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid byte size '{raw}'"))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("byte size '{raw}' overflows"))
}
