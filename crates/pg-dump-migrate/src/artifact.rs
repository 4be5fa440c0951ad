//! Temporary dump file owned by a single migration run.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Uniquely named file that receives the pg_dump archive.
///
/// The file is removed by [`DumpArtifact::cleanup`], or on drop if cleanup
/// was never reached (early return, panic unwind).
#[derive(Debug)]
pub struct DumpArtifact {
    path: TempPath,
}

impl DumpArtifact {
    /// Create an empty artifact file in `dir` (system temp dir if `None`).
    pub fn create(dir: Option<&Path>, run_id: &str) -> Result<Self> {
        let prefix = format!("pg-dump-migrate-{}-", run_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".dump");

        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| MigrateError::artifact(format!("could not create dump file: {}", e)))?;

        let path = file.into_temp_path();
        debug!("Allocated dump artifact {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the artifact on disk. Fails if the file is missing.
    pub fn size(&self) -> Result<u64> {
        std::fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| {
                MigrateError::artifact(format!(
                    "dump file {} is not readable: {}",
                    self.path.display(),
                    e
                ))
            })
    }

    /// Ensure the dump step produced a non-empty archive.
    pub fn verify_written(&self) -> Result<u64> {
        let size = self.size()?;
        if size == 0 {
            return Err(MigrateError::artifact(format!(
                "dump file {} is empty",
                self.path.display()
            )));
        }
        Ok(size)
    }

    /// Delete the file now. Returns the path that was removed.
    ///
    /// A file already deleted by someone else counts as success.
    pub fn cleanup(self) -> Result<PathBuf> {
        let path = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path),
            Err(e) => Err(MigrateError::artifact(format!(
                "could not remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names_are_unique_and_removed_on_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let a = DumpArtifact::create(Some(dir.path()), "run1").unwrap();
        let b = DumpArtifact::create(Some(dir.path()), "run1").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().exists());

        let name = a.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("pg-dump-migrate-run1-"));
        assert!(name.ends_with(".dump"));

        let removed = a.cleanup().unwrap();
        assert!(!removed.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let artifact = DumpArtifact::create(Some(dir.path()), "dropped").unwrap();
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_artifact_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = DumpArtifact::create(Some(dir.path()), "empty").unwrap();
        assert!(matches!(
            artifact.verify_written(),
            Err(MigrateError::Artifact(_))
        ));

        std::fs::write(artifact.path(), b"PGDMP").unwrap();
        assert_eq!(artifact.verify_written().unwrap(), 5);
    }

    #[test]
    fn test_cleanup_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = DumpArtifact::create(Some(dir.path()), "gone").unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        assert!(artifact.cleanup().is_ok());
    }

    #[test]
    fn test_missing_directory_is_artifact_error() {
        let err = DumpArtifact::create(Some(Path::new("/nonexistent/dir/for/dumps")), "x")
            .unwrap_err();
        assert!(matches!(err, MigrateError::Artifact(_)));
    }
}
