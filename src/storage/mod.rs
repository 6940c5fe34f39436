//! Storage backends that an index can be published to.
//!
//! Every backend exposes the same small set of path-based operations through
//! the [`Storage`] trait. Paths are always `/`-separated and relative to the
//! root of the index; `"."` names the root itself.

use std::path::Path;

use eyre::Result;
use thiserror::Error;
use tracing::*;

use crate::util::config::{PrivateIndexConfig, StorageType};

pub mod azure;
pub mod local;
pub mod object;
pub mod s3;

pub use local::LocalFileSystemStorage;
pub use object::ObjectStoreStorage;
pub use s3::S3Storage;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("path {0} not found")]
    PathNotFound(String),
}

/// A place an index lives.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    fn description(&self) -> String;

    fn join_path(&self, parts: &[&str]) -> String {
        parts.join("/")
    }

    /// Entries directly below `path`. Directories end in `/`.
    async fn listdir(&self, path: &str) -> Result<Vec<String>>;

    async fn path_exists(&self, path: &str) -> Result<bool>;

    async fn put_contents(&self, contents: &str, dest: &str) -> Result<()>;

    /// Upload a local file. With `sync`, only return once the backend
    /// reports the object as readable.
    async fn put_file(&self, src: &Path, dest: &str, sync: bool) -> Result<()>;

    async fn get_contents(&self, path: &str) -> Result<Vec<u8>>;
}

/// Build the backend selected by `[storage] type`.
pub async fn load_storage(config: &PrivateIndexConfig) -> Result<Box<dyn Storage>> {
    let section = config.storage_config()?;
    let storage: Box<dyn Storage> = match config.storage_type()? {
        StorageType::LocalFileSystem => Box::new(LocalFileSystemStorage::from_config(&section)?),
        StorageType::AwsS3 => Box::new(S3Storage::from_config(&section, config.env()).await?),
        StorageType::Azure => Box::new(azure::from_config(&section, config.env())?),
    };

    info!("using storage: {}", storage.description());
    Ok(storage)
}

pub fn guess_content_type(path: &str) -> String {
    let content_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    debug!("guessed content type of {path:?}: {content_type:?}");
    content_type
}

/// Maps index paths onto keys in a flat object namespace, under an optional
/// prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectKeys {
    prefix: Option<String>,
}

impl ObjectKeys {
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(String::from);
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The object key for `path`. The root maps to the prefix itself.
    pub fn key(&self, path: &str) -> String {
        let mut parts = vec![];
        if let Some(prefix) = &self.prefix {
            parts.push(prefix.as_str());
        }
        if path != "." {
            parts.push(path);
        }
        parts.join("/")
    }

    /// The key prefix that everything directly below `path` shares: the key
    /// with a trailing `/`, or nothing at all for an unprefixed root.
    pub fn dir_prefix(&self, path: &str) -> String {
        let key = self.key(path);
        if key.is_empty() || key.ends_with('/') {
            key
        } else {
            format!("{key}/")
        }
    }
}
