//! Bounded gunzip and tar extraction.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Component, Path, PathBuf};

use ferry_types::error::{MigrationError, PATH_TRAVERSAL, SIZE_LIMIT};
use flate2::read::GzDecoder;

fn io_error(context: &str, path: &Path, e: &io::Error) -> MigrationError {
    MigrationError::internal("SCRATCH_IO", format!("{context} '{}': {e}", path.display()))
}

/// Gunzip `src` into `dest`, failing once the output exceeds `max_bytes`.
/// Returns the decompressed size.
///
/// # Errors
///
/// Returns a security error past the size cap and a data error for a
/// corrupt gzip stream.
pub(crate) fn decompress(src: &Path, dest: &Path, max_bytes: u64) -> Result<u64, MigrationError> {
    let input = File::open(src).map_err(|e| io_error("opening", src, &e))?;
    let mut decoder = GzDecoder::new(BufReader::new(input)).take(max_bytes.saturating_add(1));
    let output = File::create(dest).map_err(|e| io_error("creating", dest, &e))?;
    let mut writer = BufWriter::new(output);

    let written = io::copy(&mut decoder, &mut writer).map_err(|e| {
        if matches!(e.kind(), io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData) {
            MigrationError::data("INVALID_ARCHIVE", format!("archive is not valid gzip: {e}"))
        } else {
            io_error("decompressing", src, &e)
        }
    })?;
    if written > max_bytes {
        drop(writer);
        let _ = std::fs::remove_file(dest);
        return Err(MigrationError::security(
            SIZE_LIMIT,
            format!("decompressed archive exceeds the {max_bytes} byte limit"),
        ));
    }
    Ok(written)
}

/// Unpack the tar at `src` into `dest`. Entries that would land outside
/// `dest` are a security error; permissions and ownership are not restored.
///
/// Absolute names, `..` components and names that pass through an earlier
/// symlink entry count as escaping. They are rejected before anything is
/// written for that entry.
///
/// # Errors
///
/// Returns a security error for escaping entries and a data error for a
/// malformed tar stream.
pub(crate) fn unpack(src: &Path, dest: &Path) -> Result<usize, MigrationError> {
    let input = File::open(src).map_err(|e| io_error("opening", src, &e))?;
    let mut archive = tar::Archive::new(BufReader::new(input));
    archive.set_preserve_permissions(false);
    archive.set_preserve_mtime(false);
    archive.set_unpack_xattrs(false);

    let entries = archive
        .entries()
        .map_err(|e| MigrationError::data("INVALID_ARCHIVE", format!("reading tar: {e}")))?;
    let mut links: Vec<PathBuf> = Vec::new();
    let mut unpacked = 0;
    for entry in entries {
        let mut entry = entry
            .map_err(|e| MigrationError::data("INVALID_ARCHIVE", format!("reading tar entry: {e}")))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let path = entry
            .path()
            .map_err(|e| MigrationError::data("INVALID_ARCHIVE", format!("entry '{name}': {e}")))?
            .into_owned();
        if escapes(&path, &links) {
            return Err(MigrationError::security(
                PATH_TRAVERSAL,
                format!("archive entry '{name}' escapes the staging directory"),
            ));
        }
        if entry.header().entry_type().is_symlink() {
            links.push(path);
        }

        let inside = entry
            .unpack_in(dest)
            .map_err(|e| MigrationError::data("INVALID_ARCHIVE", format!("unpacking '{name}': {e}")))?;
        if !inside {
            return Err(MigrationError::security(
                PATH_TRAVERSAL,
                format!("archive entry '{name}' escapes the staging directory"),
            ));
        }
        unpacked += 1;
    }
    Ok(unpacked)
}

fn escapes(path: &Path, links: &[PathBuf]) -> bool {
    path.components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        || links.iter().any(|link| path != link && path.starts_with(link))
}
