//! Secure file stager.
//!
//! Download an archive into the tracker's private scratch directory under a
//! fixed name, gunzip it under a size cap, unpack it, and validate the
//! expected artifact before anything else touches it. The scratch directory
//! belongs to the [`PipelineContext`](crate::context::PipelineContext) and is
//! removed when the pipeline run ends, whatever the outcome.

mod archive;
mod validate;

use std::path::{Path, PathBuf};

use ferry_types::error::MigrationError;
use reqwest::Url;

use crate::catalog::is_plain_file_name;
use crate::context::ArchiveLimits;
use crate::source::SourceClient;

pub use validate::validate_artifact;

/// Fixed name of the downloaded archive inside the scratch directory.
pub const ARCHIVE_FILE: &str = "archive.tar.gz";
/// Fixed name of the decompressed tar stream.
pub const TAR_FILE: &str = "archive.tar";
/// Directory the tar stream is unpacked into.
pub const EXTRACT_DIR: &str = "extracted";

/// A validated artifact ready for hand-off to a loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub downloaded_bytes: u64,
    pub decompressed_bytes: u64,
}

/// Download `url` into `scratch` and return the validated path of
/// `artifact` from the extracted archive.
///
/// # Errors
///
/// Returns a transport error for download failures and a security error
/// for size-limit violations, traversal, symlinks and hard links.
pub async fn stage_archive(
    source: &dyn SourceClient,
    url: &Url,
    scratch: &Path,
    artifact: &str,
    limits: ArchiveLimits,
) -> Result<StagedArtifact, MigrationError> {
    if !is_plain_file_name(artifact) {
        return Err(MigrationError::config(
            "INVALID_ARTIFACT",
            format!("artifact name '{artifact}' must be a plain file name"),
        ));
    }

    let archive_path = scratch.join(ARCHIVE_FILE);
    let downloaded_bytes = source
        .download(url, &archive_path, limits.max_download_bytes)
        .await?;

    let root = scratch.to_path_buf();
    let artifact = artifact.to_string();
    let max_decompressed = limits.max_decompressed_bytes;
    let staged = tokio::task::spawn_blocking(move || {
        extract_and_validate(&root, &artifact, max_decompressed)
    })
    .await
    .map_err(|e| MigrationError::internal("STAGER_TASK", format!("staging task failed: {e}")))??;

    tracing::debug!(
        artifact = %staged.0.display(),
        downloaded_bytes,
        decompressed_bytes = staged.1,
        "Archive staged"
    );
    Ok(StagedArtifact {
        path: staged.0,
        downloaded_bytes,
        decompressed_bytes: staged.1,
    })
}

fn extract_and_validate(
    root: &Path,
    artifact: &str,
    max_decompressed: u64,
) -> Result<(PathBuf, u64), MigrationError> {
    let tar_path = root.join(TAR_FILE);
    let decompressed = archive::decompress(&root.join(ARCHIVE_FILE), &tar_path, max_decompressed)?;

    let extract_dir = root.join(EXTRACT_DIR);
    if extract_dir.exists() {
        std::fs::remove_dir_all(&extract_dir).map_err(|e| {
            MigrationError::internal("SCRATCH_IO", format!("clearing extract dir: {e}"))
        })?;
    }
    std::fs::create_dir(&extract_dir).map_err(|e| {
        MigrationError::internal("SCRATCH_IO", format!("creating extract dir: {e}"))
    })?;
    archive::unpack(&tar_path, &extract_dir)?;

    let validated = validate_artifact(root, &extract_dir.join(artifact))?;
    Ok((validated, decompressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn extracts_and_validates_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(ARCHIVE_FILE),
            tar_gz(&[("project.bundle", b"bundle-bytes"), ("README", b"hi")]),
        )
        .unwrap();

        let (path, size) = extract_and_validate(dir.path(), "project.bundle", 1 << 20).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"bundle-bytes");
        assert!(size > 0);
    }

    #[test]
    fn decompression_cap_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![0_u8; 64 * 1024];
        std::fs::write(dir.path().join(ARCHIVE_FILE), tar_gz(&[("project.bundle", &big)])).unwrap();

        let err = extract_and_validate(dir.path(), "project.bundle", 1024).unwrap_err();
        assert_eq!(err.code, ferry_types::error::SIZE_LIMIT);
        assert!(!dir.path().join(TAR_FILE).exists());
    }

    #[test]
    fn corrupt_gzip_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ARCHIVE_FILE), b"not gzip at all").unwrap();
        let err = extract_and_validate(dir.path(), "project.bundle", 1024).unwrap_err();
        assert_eq!(err.code, "INVALID_ARCHIVE");
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ARCHIVE_FILE), tar_gz(&[("other", b"x")])).unwrap();
        let err = extract_and_validate(dir.path(), "project.bundle", 1024).unwrap_err();
        assert_eq!(err.code, "ARTIFACT_MISSING");
    }
}
