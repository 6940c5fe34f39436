use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use tracing::*;

use crate::util::config::StorageSection;

use super::{Storage, StorageError};

/// An index rooted in a directory on the local filesystem, for serving with
/// any static file server.
#[derive(Debug, Clone)]
pub struct LocalFileSystemStorage {
    pub base_path: PathBuf,
}

impl LocalFileSystemStorage {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn from_config(section: &StorageSection) -> Result<Self> {
        Ok(Self::new(section.require("base_path")?))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.base_path.clone();
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            resolved.push(part);
        }
        resolved
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("failed to create {parent:?}"))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for LocalFileSystemStorage {
    fn description(&self) -> String {
        format!("local filesystem at {}", self.base_path.display())
    }

    async fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.resolve(path);
        debug!("listing {dir:?}");
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::PathNotFound(dir.display().to_string()).into())
            }
            Err(e) => return Err(e).wrap_err_with(|| format!("failed to list {dir:?}")),
        };

        let mut entries = vec![];
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await?.is_dir() {
                entries.push(format!("{name}/"));
            } else {
                entries.push(name);
            }
        }

        Ok(entries)
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        let path = self.resolve(path);
        debug!("checking if {path:?} exists");
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn put_contents(&self, contents: &str, dest: &str) -> Result<()> {
        let dest_path = self.resolve(dest);
        Self::ensure_parent(&dest_path).await?;
        debug!("writing {} bytes to {dest_path:?}", contents.len());
        tokio::fs::write(&dest_path, contents)
            .await
            .wrap_err_with(|| format!("failed to write {dest_path:?}"))?;
        Ok(())
    }

    async fn put_file(&self, src: &Path, dest: &str, _sync: bool) -> Result<()> {
        let dest_path = self.resolve(dest);
        Self::ensure_parent(&dest_path).await?;
        debug!("copying {src:?} -> {dest_path:?}");
        tokio::fs::copy(src, &dest_path)
            .await
            .wrap_err_with(|| format!("failed to copy {src:?} to {dest_path:?}"))?;
        Ok(())
    }

    async fn get_contents(&self, path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(path);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::PathNotFound(path.display().to_string()).into())
            }
            Err(e) => Err(e).wrap_err_with(|| format!("failed to read {path:?}")),
        }
    }
}
