//! HTTP implementation of [`SourceClient`] over the relation export API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ferry_types::entity::EntityKind;
use ferry_types::error::{MigrationError, SIZE_LIMIT};
use ferry_types::page::{ExtractedData, PageInfo, Record};
use reqwest::header::RETRY_AFTER;
use reqwest::{redirect, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use super::{PageRequest, SourceClient};
use crate::url_guard::UrlGuard;

const MAX_REDIRECTS: usize = 5;

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default)]
    page_info: PageInfo,
}

pub struct HttpSourceClient {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    guard: UrlGuard,
}

impl HttpSourceClient {
    /// Build a client for the instance at `base`. Redirect targets are
    /// checked against `guard` before they are followed.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base: Url,
        token: Option<String>,
        timeout: Duration,
        guard: UrlGuard,
    ) -> anyhow::Result<Self> {
        let redirect_guard = guard.clone();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if let Err(e) = redirect_guard.validate(attempt.url()) {
                attempt.error(e)
            } else {
                attempt.follow()
            }
        });
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(policy)
            .user_agent(concat!("ferry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base,
            token,
            guard,
        })
    }

    fn endpoint(
        &self,
        entity_kind: EntityKind,
        entity_path: &str,
        tail: &[&str],
    ) -> Result<Url, MigrationError> {
        let collection = match entity_kind {
            EntityKind::Group => "groups",
            EntityKind::Project => "projects",
        };
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                MigrationError::config(
                    "INVALID_SOURCE_URL",
                    format!("'{}' cannot be a base url", self.base),
                )
            })?
            .pop_if_empty()
            .extend(["api", "v4", collection, entity_path, "export_relations"])
            .extend(tail);
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn map_send_error(e: &reqwest::Error) -> MigrationError {
    if e.is_redirect() {
        return MigrationError::security(
            ferry_types::error::BLOCKED_URL,
            format!("redirect refused: {e}"),
        );
    }
    let code = if e.is_timeout() {
        "TIMEOUT"
    } else if e.is_connect() {
        "CONNECT"
    } else {
        "REQUEST"
    };
    MigrationError::transport(code, e.to_string(), true)
}

fn retry_after_ms(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1_000))
}

async fn check_status(response: Response) -> Result<Response, MigrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MigrationError::rate_limit(
            "HTTP_429",
            format!("rate limited by {url}"),
            retry_after_ms(&response),
        ));
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(MigrationError::transport(
        format!("HTTP_{}", status.as_u16()),
        format!("GET {url} returned {status}: {snippet}"),
        status.is_server_error(),
    ))
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<ExtractedData, MigrationError> {
        let mut url = self.endpoint(request.entity_kind, request.entity_path, &[request.relation])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = request.cursor {
                query.append_pair("cursor", cursor);
            }
            query.append_pair("per_page", &request.page_size.to_string());
        }
        self.guard.validate(&url)?;

        let response = self.get(url).send().await.map_err(|e| map_send_error(&e))?;
        let response = check_status(response).await?;
        let body: PageBody = response.json().await.map_err(|e| {
            if e.is_decode() {
                MigrationError::data("INVALID_PAGE", format!("malformed page body: {e}"))
            } else {
                map_send_error(&e)
            }
        })?;

        Ok(ExtractedData::new(
            body.records.into_iter().map(Record::new).collect(),
            body.page_info,
        ))
    }

    async fn download_url(
        &self,
        entity_path: &str,
        entity_kind: EntityKind,
        relation: &str,
    ) -> Result<Url, MigrationError> {
        let mut url = self.endpoint(entity_kind, entity_path, &["download"])?;
        url.query_pairs_mut().append_pair("relation", relation);
        Ok(url)
    }

    async fn download(&self, url: &Url, dest: &Path, max_bytes: u64) -> Result<u64, MigrationError> {
        self.guard.validate_resolved(url).await?;

        let response = self
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_send_error(&e))?;
        let mut response = check_status(response).await?;
        if response.content_length().is_some_and(|len| len > max_bytes) {
            return Err(too_large(max_bytes));
        }

        let io_error = |e: std::io::Error| {
            MigrationError::internal("SCRATCH_IO", format!("writing {}: {e}", dest.display()))
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_error)?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| map_send_error(&e))? {
            written += chunk.len() as u64;
            if written > max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(too_large(max_bytes));
            }
            file.write_all(&chunk).await.map_err(io_error)?;
        }
        file.flush().await.map_err(io_error)?;

        tracing::debug!(url = %url, bytes = written, "Download complete");
        Ok(written)
    }
}

fn too_large(max_bytes: u64) -> MigrationError {
    MigrationError::security(
        SIZE_LIMIT,
        format!("download exceeds the {max_bytes} byte limit"),
    )
}
