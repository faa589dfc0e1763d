//! Pre-use validation of staged artifacts.

use std::path::{Component, Path, PathBuf};

#[cfg(unix)]
use ferry_types::error::HARD_LINK;
use ferry_types::error::{MigrationError, PATH_TRAVERSAL, SYMLINK};

/// Validate `path` as a regular, singly-linked file strictly inside `root`,
/// returning its canonical path.
///
/// Checks run in this order: lexical `..` components, symlink (without
/// following it), canonical containment, file type, hard-link count.
///
/// # Errors
///
/// Returns a security error for traversal, symlinks and hard links, and a
/// data error when the artifact is missing or not a regular file.
pub fn validate_artifact(root: &Path, path: &Path) -> Result<PathBuf, MigrationError> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(MigrationError::security(
            PATH_TRAVERSAL,
            format!("artifact path '{}' contains '..'", path.display()),
        ));
    }

    let meta = std::fs::symlink_metadata(path).map_err(|e| {
        MigrationError::data(
            "ARTIFACT_MISSING",
            format!("artifact '{}' not found in archive: {e}", display_name(path)),
        )
    })?;
    if meta.file_type().is_symlink() {
        return Err(MigrationError::security(
            SYMLINK,
            format!("artifact '{}' is a symbolic link", display_name(path)),
        ));
    }

    let canonical_root = canonicalize(root)?;
    let canonical = canonicalize(path)?;
    if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
        return Err(MigrationError::security(
            PATH_TRAVERSAL,
            format!(
                "artifact '{}' resolves outside the staging directory",
                display_name(path)
            ),
        ));
    }

    if !meta.is_file() {
        return Err(MigrationError::data(
            "ARTIFACT_NOT_FILE",
            format!("artifact '{}' is not a regular file", display_name(path)),
        ));
    }

    check_link_count(&meta, path)?;
    Ok(canonical)
}

fn canonicalize(path: &Path) -> Result<PathBuf, MigrationError> {
    path.canonicalize().map_err(|e| {
        MigrationError::internal(
            "SCRATCH_IO",
            format!("resolving '{}': {e}", path.display()),
        )
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(unix)]
fn check_link_count(meta: &std::fs::Metadata, path: &Path) -> Result<(), MigrationError> {
    use std::os::unix::fs::MetadataExt;

    if meta.nlink() > 1 {
        return Err(MigrationError::security(
            HARD_LINK,
            format!(
                "artifact '{}' has {} hard links",
                display_name(path),
                meta.nlink()
            ),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_link_count(_meta: &std::fs::Metadata, path: &Path) -> Result<(), MigrationError> {
    tracing::debug!(
        path = %path.display(),
        "Hard link count unavailable on this platform, skipping check"
    );
    Ok(())
}
