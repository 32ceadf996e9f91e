//! Packs saved pages into a `.cbz` (zip) archive.
//!
//! Everything here is blocking file IO and deflate compression; async callers
//! run [`assemble`] through `tokio::task::spawn_blocking`. All paths are
//! explicit, nothing depends on the process working directory.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Extension of the archive file.
pub const ARCHIVE_EXTENSION: &str = "cbz";

/// Errors raised while writing the archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// File system error while reading a page or writing the archive.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The zip writer rejected an entry or could not finish the archive.
    #[error("zip error writing {path}: {source}")]
    Zip {
        /// Archive path.
        path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// A page name has no usable file name component.
    #[error("invalid archive entry name: {name:?}")]
    InvalidEntry {
        /// The rejected name.
        name: String,
    },
}

impl ArchiveError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn zip(path: &Path, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Returns the archive path for `archive_name` inside `directory`.
#[must_use]
pub fn archive_path(directory: &Path, archive_name: &str) -> PathBuf {
    directory.join(format!("{archive_name}.{ARCHIVE_EXTENSION}"))
}

/// Entry name for a page: its bare file name, never a directory component.
fn entry_name(name: &str) -> Result<String, ArchiveError> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ArchiveError::InvalidEntry {
            name: name.to_string(),
        })
}

/// Writes `ordered_files` (names inside `directory`) into `{archive_name}.cbz`.
///
/// Entries keep the given order and use deflate compression. The archive is
/// written to a temporary sibling and renamed into place once complete, so an
/// interrupted run never leaves a truncated `.cbz`. With `zip_only`, each
/// source file is deleted after the archive is closed; deletion failures are
/// logged and do not fail the call.
///
/// # Errors
///
/// Returns [`ArchiveError`] if a page cannot be read or the archive cannot be
/// written. Source files are never deleted in that case.
#[instrument(
    skip(ordered_files),
    fields(directory = %directory.display(), pages = ordered_files.len())
)]
pub fn assemble(
    directory: &Path,
    ordered_files: &[String],
    archive_name: &str,
    zip_only: bool,
) -> Result<PathBuf, ArchiveError> {
    let target = archive_path(directory, archive_name);
    let partial = target.with_extension(format!("{ARCHIVE_EXTENSION}.tmp"));

    if let Err(error) = write_archive(directory, ordered_files, &partial) {
        if let Err(cleanup) = std::fs::remove_file(&partial) {
            debug!(path = %partial.display(), error = %cleanup, "no partial archive to remove");
        }
        return Err(error);
    }
    std::fs::rename(&partial, &target).map_err(|e| ArchiveError::io(&target, e))?;
    info!(path = %target.display(), pages = ordered_files.len(), "archive written");

    if zip_only {
        remove_sources(directory, ordered_files);
    }
    Ok(target)
}

fn write_archive(
    directory: &Path,
    ordered_files: &[String],
    target: &Path,
) -> Result<(), ArchiveError> {
    let file = File::create(target).map_err(|e| ArchiveError::io(target, e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in ordered_files {
        let entry = entry_name(name)?;
        let source_path = directory.join(&entry);
        let source = File::open(&source_path).map_err(|e| ArchiveError::io(&source_path, e))?;

        writer
            .start_file(entry.as_str(), options)
            .map_err(|e| ArchiveError::zip(target, e))?;
        std::io::copy(&mut BufReader::new(source), &mut writer)
            .map_err(|e| ArchiveError::io(&source_path, e))?;
        debug!(entry = %entry, "added page");
    }

    let mut inner = writer.finish().map_err(|e| ArchiveError::zip(target, e))?;
    std::io::Write::flush(&mut inner).map_err(|e| ArchiveError::io(target, e))?;
    Ok(())
}

fn remove_sources(directory: &Path, files: &[String]) {
    let mut removed = 0usize;
    for name in files {
        let Ok(entry) = entry_name(name) else {
            continue;
        };
        let path = directory.join(entry);
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => warn!(path = %path.display(), error = %error, "could not delete page"),
        }
    }
    debug!(removed, "deleted archived pages");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Read;

    use tempfile::TempDir;

    use super::*;

    fn write_pages(dir: &Path, names: &[&str]) -> Vec<String> {
        for name in names {
            std::fs::write(dir.join(name), format!("payload of {name}")).unwrap();
        }
        names.iter().map(|n| (*n).to_string()).collect()
    }

    fn entries(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_assemble_keeps_order_and_plain_names() {
        let dir = TempDir::new().unwrap();
        let files = write_pages(dir.path(), &["0.jpg", "1.png", "2.jpg", "10.jpg"]);

        let path = assemble(dir.path(), &files, "My Gallery", false).unwrap();

        assert_eq!(path, dir.path().join("My Gallery.cbz"));
        let names = entries(&path);
        assert_eq!(names, vec!["0.jpg", "1.png", "2.jpg", "10.jpg"]);
        assert!(names.iter().all(|n| !n.contains('/') && !n.contains('\\')));
        assert!(!dir.path().join("My Gallery.cbz.tmp").exists());
    }

    #[test]
    fn test_assemble_uses_deflate_and_round_trips_content() {
        let dir = TempDir::new().unwrap();
        let files = write_pages(dir.path(), &["0.jpg"]);
        let path = assemble(dir.path(), &files, "g", false).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut entry = archive.by_name("0.jpg").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "payload of 0.jpg");
    }

    #[test]
    fn test_assemble_zip_only_removes_sources() {
        let dir = TempDir::new().unwrap();
        let files = write_pages(dir.path(), &["0.jpg", "1.jpg"]);
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assemble(dir.path(), &files, "g", true).unwrap();

        assert!(!dir.path().join("0.jpg").exists());
        assert!(!dir.path().join("1.jpg").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("g.cbz").exists());
    }

    #[test]
    fn test_assemble_without_zip_only_keeps_sources() {
        let dir = TempDir::new().unwrap();
        let files = write_pages(dir.path(), &["0.jpg", "1.jpg"]);
        assemble(dir.path(), &files, "g", false).unwrap();
        assert!(dir.path().join("0.jpg").exists());
        assert!(dir.path().join("1.jpg").exists());
    }

    #[test]
    fn test_assemble_strips_directory_components() {
        let dir = TempDir::new().unwrap();
        write_pages(dir.path(), &["3.jpg"]);
        let path = assemble(dir.path(), &["nested/3.jpg".to_string()], "g", false).unwrap();
        assert_eq!(entries(&path), vec!["3.jpg"]);
    }

    #[test]
    fn test_assemble_missing_page_fails_without_deleting() {
        let dir = TempDir::new().unwrap();
        let mut files = write_pages(dir.path(), &["0.jpg"]);
        files.push("1.jpg".to_string());

        let error = assemble(dir.path(), &files, "g", true).unwrap_err();

        assert!(matches!(error, ArchiveError::Io { .. }));
        assert!(dir.path().join("0.jpg").exists());
        assert!(!dir.path().join("g.cbz").exists());
        assert!(!dir.path().join("g.cbz.tmp").exists());
    }

    #[test]
    fn test_entry_name_rejects_empty() {
        assert!(matches!(entry_name(""), Err(ArchiveError::InvalidEntry { .. })));
        assert_eq!(entry_name("a/b/5.png").unwrap(), "5.png");
    }
}
