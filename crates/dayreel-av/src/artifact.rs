//! Write-then-rename handling for pipeline outputs.
//!
//! A [`PartialArtifact`] hands the Media Engine a `*.partial.mp4` sibling of
//! the real destination. The destination only appears once
//! [`PartialArtifact::commit`] renames the finished file into place, so a
//! crash or engine failure never leaves a truncated file under the final
//! name.

use std::path::{Path, PathBuf};

use dayreel_common::layout::partial_path;
use dayreel_common::{Error, Result};

/// A pending output file and its final destination.
#[derive(Debug)]
pub struct PartialArtifact {
    partial: PathBuf,
    dest: PathBuf,
}

impl PartialArtifact {
    /// Prepare an artifact for `dest`, removing any stale partial file left
    /// by an earlier crash.
    pub async fn begin(dest: &Path) -> Result<Self> {
        let partial = partial_path(dest);
        remove_if_exists(&partial).await?;
        Ok(Self {
            partial,
            dest: dest.to_path_buf(),
        })
    }

    /// Where the engine should write.
    pub fn path(&self) -> &Path {
        &self.partial
    }

    /// Final destination.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Move the finished partial file to its destination.
    ///
    /// Tries a rename first and falls back to copy+remove across filesystems.
    pub async fn commit(self) -> Result<PathBuf> {
        if !tokio::fs::try_exists(&self.partial).await? {
            return Err(Error::Internal(format!(
                "output file does not exist: {}",
                self.partial.display()
            )));
        }

        if tokio::fs::rename(&self.partial, &self.dest).await.is_err() {
            tokio::fs::copy(&self.partial, &self.dest).await?;
            let _ = tokio::fs::remove_file(&self.partial).await;
        }
        Ok(self.dest)
    }

    /// Drop whatever the engine wrote.
    pub async fn discard(self) {
        if let Err(e) = remove_if_exists(&self.partial).await {
            tracing::warn!(path = %self.partial.display(), "Failed to remove partial output: {e}");
        }
    }
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_moves_partial_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("3_processed.mp4");

        let artifact = PartialArtifact::begin(&dest).await.unwrap();
        assert_eq!(
            artifact.path().file_name().unwrap(),
            "3_processed.partial.mp4"
        );
        std::fs::write(artifact.path(), b"video").unwrap();

        let path = artifact.commit().await.unwrap();
        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"video");
        assert!(!dir.path().join("3_processed.partial.mp4").exists());
    }

    #[tokio::test]
    async fn commit_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = PartialArtifact::begin(&dir.path().join("x.mp4")).await.unwrap();
        assert!(artifact.commit().await.is_err());
        assert!(!dir.path().join("x.mp4").exists());
    }

    #[tokio::test]
    async fn begin_clears_stale_partial_and_discard_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.mp4");
        std::fs::write(partial_path(&dest), b"stale").unwrap();

        let artifact = PartialArtifact::begin(&dest).await.unwrap();
        assert!(!artifact.path().exists());

        std::fs::write(artifact.path(), b"half").unwrap();
        let partial = artifact.path().to_path_buf();
        artifact.discard().await;
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn removing_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_if_exists(&dir.path().join("nope")).await.unwrap();
    }
}
