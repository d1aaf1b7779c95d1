//! Per-unit private directory

use crate::request::AttachedFile;
use crate::sanitize::WORKDIR_PREFIX;
use crate::{Result, SlateError};
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

/// Directory (mode 0700) that is the unit's cwd, `HOME` and only writable
/// location. Removed on drop.
#[derive(Debug)]
pub struct Workdir {
    dir: TempDir,
}

impl Workdir {
    pub fn create(root: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .permissions(Permissions::from_mode(0o700))
            .tempdir_in(root)
            .map_err(|e| {
                SlateError::Spawn(format!(
                    "cannot create work directory in {}: {e}",
                    root.display()
                ))
            })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the submitted code and attached files
    ///
    /// File names must already be validated as single path components.
    pub async fn materialize(
        &self,
        main_file: &str,
        code: &str,
        files: &[AttachedFile],
    ) -> Result<()> {
        for file in files {
            tokio::fs::write(self.path().join(&file.name), &file.content).await?;
        }
        tokio::fs::write(self.path().join(main_file), code).await?;
        tracing::trace!(dir = ?self.path(), files = files.len(), "work directory populated");
        Ok(())
    }

    /// Remove the directory now, logging instead of failing
    pub fn close(self) {
        let path = self.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(dir = ?path, error = %e, "failed to remove work directory");
        }
    }
}
