//! Semantic validation for parsed migration configuration values.

use anyhow::{bail, Result};
use reqwest::Url;

use crate::catalog::validate_catalog;
use crate::config::types::{parse_byte_size, MigrationConfig};

/// Validate host patterns in `allowed_hosts` lists.
/// Only `*.domain` single-level wildcards are supported.
fn validate_host_patterns(hosts: &[String], errors: &mut Vec<String>) {
    for host in hosts {
        let trimmed = host.trim();
        if trimmed.is_empty() {
            errors.push("network.allowed_hosts: empty host pattern".to_string());
            continue;
        }
        if trimmed.contains('*') && !trimmed.starts_with("*.") {
            errors.push(format!(
                "network.allowed_hosts: invalid host pattern '{host}', only '*.domain' wildcards supported"
            ));
        }
        if trimmed.starts_with("*.") && trimmed[2..].contains('*') {
            errors.push(format!(
                "network.allowed_hosts: invalid host pattern '{host}', nested wildcards not supported"
            ));
        }
    }
}

fn validate_instance_url(raw: &str, context: &str, errors: &mut Vec<String>) {
    match Url::parse(raw) {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => errors.push(format!(
            "{context}: url scheme '{}' is not allowed, expected http or https",
            url.scheme()
        )),
        Ok(url) if url.host_str().is_none() => {
            errors.push(format!("{context}: url '{raw}' has no host"));
        }
        Ok(_) => {}
        Err(e) => errors.push(format!("{context}: invalid url '{raw}': {e}")),
    }
}

fn validate_path(path: &str, context: &str, errors: &mut Vec<String>) {
    if path.split('/').any(|segment| segment == "..") {
        errors.push(format!("{context}: path '{path}' must not contain '..'"));
    }
}

/// Validate a parsed migration configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the migration config.
pub fn validate_migration(config: &MigrationConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported migration version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.migration.trim().is_empty() {
        errors.push("Migration name must not be empty".to_string());
    }

    validate_instance_url(&config.source.url, "source", &mut errors);
    validate_instance_url(&config.destination.url, "destination", &mut errors);

    if config.source.page_size == 0 {
        errors.push("source.page_size must be > 0".to_string());
    }
    if config.source.timeout_seconds == 0 {
        errors.push("source.timeout_seconds must be > 0".to_string());
    }

    if config.entities.is_empty() {
        errors.push("At least one entity must be configured".to_string());
    }
    for (index, entity) in config.entities.iter().enumerate() {
        let context = format!("entities[{index}]");
        if entity.source_full_path.trim().is_empty() {
            errors.push(format!("{context}: source_full_path must not be empty"));
        }
        if entity.destination_slug.trim().is_empty() {
            errors.push(format!("{context}: destination_slug must not be empty"));
        }
        if entity.destination_slug.contains('/') {
            errors.push(format!(
                "{context}: destination_slug '{}' must not contain '/'",
                entity.destination_slug
            ));
        }
        validate_path(&entity.source_full_path, &context, &mut errors);
        validate_path(&entity.destination_namespace, &context, &mut errors);
    }

    if config.resources.parallelism == 0 {
        errors.push("resources.parallelism must be >= 1".to_string());
    }

    for (field, value) in [
        ("network.max_download_size", &config.network.max_download_size),
        (
            "network.max_decompressed_size",
            &config.network.max_decompressed_size,
        ),
    ] {
        match parse_byte_size(value) {
            Ok(0) => errors.push(format!("{field} must be > 0")),
            Ok(_) => {}
            Err(_) => errors.push(format!("{field}: invalid byte size '{value}'")),
        }
    }
    validate_host_patterns(&config.network.allowed_hosts, &mut errors);

    match config.users.fallback_user_id {
        Some(id) if id <= 0 => {
            errors.push(format!("users.fallback_user_id must be > 0, got {id}"));
        }
        None if !config.users.mapping => errors.push(
            "users.fallback_user_id is required when users.mapping is disabled".to_string(),
        ),
        _ => {}
    }

    if let Some(catalog) = &config.catalog {
        if catalog.is_empty() {
            errors.push("catalog must define at least one pipeline when set".to_string());
        }
        errors.extend(validate_catalog(catalog));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!(
            "Migration validation failed:\n  - {}",
            errors.join("\n  - ")
        )
    }
}
