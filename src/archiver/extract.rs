//! Zip extraction into the local reports folder.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// A downloaded archive that is removed from disk when dropped.
///
/// Holding one guarantees the zip is deleted on every exit path of the
/// archive pipeline.
#[derive(Debug)]
pub struct TempArchive {
    path: PathBuf,
}

impl TempArchive {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(file = %self.path.display(), "Removed downloaded archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(file = %self.path.display(), error = %e, "Failed to remove downloaded archive"),
        }
    }
}

/// Unpack `archive` into `destination`.
///
/// Every entry must live under `root` (the execution folder name); otherwise
/// nothing is written.
pub fn extract_archive(archive: &Path, destination: &Path, root: &str) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid zip archive", archive.display()))?;
    check_entries(&mut zip, root)
        .with_context(|| format!("Refusing to extract {}", archive.display()))?;
    zip.extract(destination).with_context(|| {
        format!(
            "Couldn't extract {} into {}",
            archive.display(),
            destination.display()
        )
    })?;
    Ok(())
}

fn check_entries(zip: &mut zip::ZipArchive<File>, root: &str) -> Result<()> {
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let is_dir = entry.is_dir();
        let inside = entry
            .enclosed_name()
            .is_some_and(|name| name.starts_with(root) && (is_dir || name.components().count() > 1));
        if !inside {
            bail!("entry {} is outside {root}/", entry.name());
        }
    }
    Ok(())
}

/// Remove a local execution folder. Errors are logged, never escalated.
pub fn remove_folder(folder: &Path) {
    match std::fs::remove_dir_all(folder) {
        Ok(()) => tracing::debug!(folder = %folder.display(), "Deleted local execution folder"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!(folder = %folder.display(), error = %e, "Failed to delete folder"),
    }
}
