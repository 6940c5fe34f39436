use std::path::{Path, PathBuf};

use eyre::Result;
use tracing::*;

/// A scratch directory that is removed when dropped.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub async fn new() -> Result<TempDir> {
        let mut path = std::env::temp_dir();
        path.push(format!("pypi-private-workdir-{}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&path).await?;

        Ok(TempDir { path })
    }

    pub fn path_view(&self) -> PathBuf {
        self.path.clone()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        debug!("dropping temp dir {:?}", self.path);
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("failed to remove temp dir {:?}: {e}", self.path);
            }
        }
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}
