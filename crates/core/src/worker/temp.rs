//! Per-job temporary files.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Owns the temporary files of one pipeline run.
///
/// Paths are deduplicated, so a canonical input that doubles as the
/// extraction input is removed once. Files that are already gone are not an
/// error. If the guard is dropped without `cleanup` (a timed-out or
/// cancelled run), the files are removed synchronously on drop.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path for removal and return it.
    pub fn track(&mut self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path.clone());
        }
        path
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every tracked file. Returns how many existed.
    pub async fn cleanup(mut self) -> usize {
        let mut removed = 0;
        for path in std::mem::take(&mut self.paths) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }
        debug!(removed, "Temp files cleaned up");
        removed
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_quietly(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cleanup_deduplicates_and_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("job.source.fits");
        std::fs::write(&source, b"x").unwrap();

        let mut temp = TempFiles::new();
        temp.track(&source);
        temp.track(&source);
        temp.track(dir.path().join("never-created.fits"));
        assert_eq!(temp.paths().len(), 2);

        assert_eq!(temp.cleanup().await, 1);
        assert!(!source.exists());
    }

    #[test]
    fn test_drop_removes_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.fits");
        std::fs::write(&path, b"x").unwrap();

        {
            let mut temp = TempFiles::new();
            temp.track(&path);
        }
        assert!(!path.exists());
    }
}
