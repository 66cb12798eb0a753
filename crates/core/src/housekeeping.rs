use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Moves `root/filename` into `root/archive_dir_name/`, creating the archive
/// directory if needed. An existing file of the same name is replaced.
pub fn archive_file(root: &Path, archive_dir_name: &str, filename: &str) -> io::Result<PathBuf> {
    let archive_dir = root.join(archive_dir_name);
    if !archive_dir.is_dir() {
        fs::create_dir_all(&archive_dir)?;
        info!(path = %archive_dir.display(), "created archive directory");
    }

    let source = root.join(filename);
    let destination = archive_dir.join(filename);

    if fs::rename(&source, &destination).is_err() {
        // Rename fails across filesystems; copy then remove instead.
        fs::copy(&source, &destination)?;
        fs::remove_file(&source)?;
    }

    info!(from = %source.display(), to = %destination.display(), "archived file");
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archive_creates_directory_and_moves_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("manual.pdf"), b"%PDF")?;

        let moved = archive_file(dir.path(), "archive", "manual.pdf")?;

        assert_eq!(moved, dir.path().join("archive").join("manual.pdf"));
        assert!(moved.is_file());
        assert!(!dir.path().join("manual.pdf").exists());
        Ok(())
    }

    #[test]
    fn archiving_a_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(archive_file(dir.path(), "archive", "ghost.pdf").is_err());
    }
}
