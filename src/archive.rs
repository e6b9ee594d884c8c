// Moving processed files into the archive folder.
// A file is either moved whole or left where it was: an existing archive
// entry is never overwritten, and a copy that cannot be completed is
// removed again.

use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, UploadError};

pub struct Archivist {
    archive_folder: PathBuf,
}

impl Archivist {
    pub fn new(archive_folder: impl Into<PathBuf>) -> Self {
        Archivist {
            archive_folder: archive_folder.into(),
        }
    }

    pub fn archive_folder(&self) -> &Path {
        &self.archive_folder
    }

    /// Move `source` into the archive and return its new path.
    pub fn archive(&self, source: &Path) -> Result<PathBuf> {
        self.archive_at(source, Local::now())
    }

    /// Like [`Archivist::archive`] with an explicit timestamp for the
    /// collision suffix.
    pub fn archive_at(&self, source: &Path, now: DateTime<Local>) -> Result<PathBuf> {
        let to_archive_error = |source_err: io::Error| UploadError::Archive {
            path: source.to_path_buf(),
            source: source_err,
        };

        let file_name = source.file_name().ok_or_else(|| {
            to_archive_error(io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
        })?;
        if !source.is_file() {
            return Err(to_archive_error(io::Error::new(
                io::ErrorKind::NotFound,
                "source file does not exist",
            )));
        }

        let destination = self.free_destination(Path::new(file_name), now);
        move_file(source, &destination).map_err(to_archive_error)?;
        tracing::debug!(from = %source.display(), to = %destination.display(), "archived");
        Ok(destination)
    }

    /// First archive path for `file_name` that is not taken:
    /// `name.ext`, then `name-YYYYMMDDHHMMSS.ext`, then `name-YYYYMMDDHHMMSS-N.ext`.
    fn free_destination(&self, file_name: &Path, now: DateTime<Local>) -> PathBuf {
        let plain = self.archive_folder.join(file_name);
        if !plain.exists() {
            return plain;
        }

        let stem = file_name
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = file_name
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stamp = now.format("%Y%m%d%H%M%S");

        let stamped = self.archive_folder.join(format!("{}-{}{}", stem, stamp, extension));
        if !stamped.exists() {
            return stamped;
        }
        (1..)
            .map(|n| self.archive_folder.join(format!("{}-{}-{}{}", stem, stamp, n, extension)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(stamped)
    }
}

/// Rename, or copy and remove when the archive is on another filesystem.
fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => return Ok(()),
        Err(e) => tracing::warn!(
            error = %e,
            from = %source.display(),
            to = %destination.display(),
            "rename failed, falling back to copy+remove"
        ),
    }

    if let Err(e) = fs::copy(source, destination) {
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(source) {
        // The source stays authoritative; drop the copy so the file is not
        // both archived and pending.
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (tempfile::TempDir, Archivist) {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        fs::create_dir(&archive).unwrap();
        (dir, Archivist::new(archive))
    }

    #[test]
    fn moves_file_into_archive() {
        let (dir, archivist) = setup();
        let source = dir.path().join("scan.nessus");
        fs::write(&source, b"data").unwrap();

        let archived = archivist.archive(&source).unwrap();

        assert_eq!(archived, archivist.archive_folder().join("scan.nessus"));
        assert!(!source.exists());
        assert_eq!(fs::read(&archived).unwrap(), b"data");
    }

    #[test]
    fn collisions_get_a_timestamp_suffix() {
        let (dir, archivist) = setup();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap();
        fs::write(archivist.archive_folder().join("scan.xml"), b"old").unwrap();
        let source = dir.path().join("scan.xml");
        fs::write(&source, b"new").unwrap();

        let archived = archivist.archive_at(&source, now).unwrap();

        assert_eq!(archived, archivist.archive_folder().join("scan-20240309140506.xml"));
        assert_eq!(fs::read(archivist.archive_folder().join("scan.xml")).unwrap(), b"old");
        assert_eq!(fs::read(&archived).unwrap(), b"new");
    }

    #[test]
    fn repeated_collisions_get_a_counter() {
        let (dir, archivist) = setup();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 6).unwrap();
        fs::write(archivist.archive_folder().join("scan"), b"1").unwrap();
        fs::write(archivist.archive_folder().join("scan-20240309140506"), b"2").unwrap();
        let source = dir.path().join("scan");
        fs::write(&source, b"3").unwrap();

        let archived = archivist.archive_at(&source, now).unwrap();
        assert_eq!(archived, archivist.archive_folder().join("scan-20240309140506-1"));
    }

    #[test]
    fn missing_source_is_an_archive_error() {
        let (dir, archivist) = setup();
        let err = archivist.archive(&dir.path().join("gone.csv")).unwrap_err();
        assert!(matches!(err, UploadError::Archive { .. }));
        assert_eq!(fs::read_dir(archivist.archive_folder()).unwrap().count(), 0);
    }

    #[test]
    fn missing_archive_folder_leaves_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let archivist = Archivist::new(dir.path().join("no-such-archive"));
        let source = dir.path().join("scan.csv");
        fs::write(&source, b"data").unwrap();

        let err = archivist.archive(&source).unwrap_err();
        assert!(matches!(err, UploadError::Archive { .. }));
        assert_eq!(fs::read(&source).unwrap(), b"data");
    }

    #[test]
    fn failed_rename_and_copy_leave_only_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.xml");
        fs::write(&source, b"data").unwrap();
        let destination = dir.path().join("missing").join("scan.xml");

        assert!(move_file(&source, &destination).is_err());
        assert_eq!(fs::read(&source).unwrap(), b"data");
        assert!(!destination.exists());
    }
}
