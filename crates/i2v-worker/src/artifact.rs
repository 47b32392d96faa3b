//! Scoped temporary files.
//!
//! A [`TempArtifact`] owns a file in the work directory and deletes it when
//! dropped, so every exit path of a job (success, error, panic unwinding)
//! releases it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, info, warn};

/// A temporary file removed on drop.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    label: &'static str,
    guard: Option<TempPath>,
}

impl TempArtifact {
    /// Reserve a new, empty, uniquely named file in `dir`.
    pub async fn create(
        dir: &Path,
        prefix: &str,
        suffix: &str,
        label: &'static str,
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        let guard = file.into_temp_path();
        let path = guard.to_path_buf();

        debug!("Reserved temporary {}: {}", label, path.display());
        Ok(Self {
            path,
            label,
            guard: Some(guard),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now instead of at drop.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        match guard.close() {
            Ok(()) => info!("Cleaned up temporary {}: {}", self.label, self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Temporary {} already gone: {}", self.label, self.path.display())
            }
            Err(e) => warn!(
                "Failed to remove temporary {} {}: {}",
                self.label,
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}
