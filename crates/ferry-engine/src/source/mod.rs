//! Source instance access.
//!
//! The engine reads the source instance through [`SourceClient`]: a paged
//! export of one relation, and a byte download of a relation archive.

mod http;

use std::path::Path;

use async_trait::async_trait;
use ferry_types::entity::EntityKind;
use ferry_types::error::MigrationError;
use ferry_types::page::ExtractedData;
use reqwest::Url;

pub use http::HttpSourceClient;

/// One page request for one relation of one entity.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub entity_path: &'a str,
    pub entity_kind: EntityKind,
    pub relation: &'a str,
    pub cursor: Option<&'a str>,
    pub page_size: u32,
}

/// Black-box interface to the source instance.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of `request.relation`, continuing from `request.cursor`.
    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<ExtractedData, MigrationError>;

    /// URL of the downloadable archive for `relation`.
    async fn download_url(
        &self,
        entity_path: &str,
        entity_kind: EntityKind,
        relation: &str,
    ) -> Result<Url, MigrationError>;

    /// Stream `url` into `dest`, failing once more than `max_bytes` arrive.
    /// Returns the number of bytes written.
    async fn download(&self, url: &Url, dest: &Path, max_bytes: u64) -> Result<u64, MigrationError>;
}
