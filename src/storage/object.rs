use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use eyre::{Result, WrapErr};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::*;

use super::{guess_content_type, ObjectKeys, Storage, StorageError};

/// An index kept in any `object_store` backend. Azure blob storage goes
/// through here, as does the in-memory store used for embedding and tests.
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    keys: ObjectKeys,
    description: String,
}

impl ObjectStoreStorage {
    pub fn new<S: Into<String>>(
        store: Arc<dyn ObjectStore>,
        prefix: Option<&str>,
        description: S,
    ) -> Self {
        Self {
            store,
            keys: ObjectKeys::new(prefix),
            description: description.into(),
        }
    }

    pub fn in_memory(prefix: Option<&str>) -> Self {
        Self::new(Arc::new(InMemory::new()), prefix, "in-memory object store")
    }

    /// `None` is the unprefixed root of the store.
    fn location(&self, path: &str) -> Option<ObjectPath> {
        let key = self.keys.key(path);
        if key.is_empty() {
            None
        } else {
            Some(ObjectPath::from(key))
        }
    }

    fn require_location(&self, path: &str) -> Result<ObjectPath> {
        self.location(path)
            .ok_or_else(|| eyre::eyre!("the root of {} is not an object", self.description))
    }

    async fn put_bytes(&self, data: Bytes, dest: &str) -> Result<()> {
        let location = self.require_location(dest)?;
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(guess_content_type(dest)),
        );
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        debug!("writing {} bytes to {location}", data.len());
        self.store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
            .wrap_err_with(|| format!("failed to write {location}"))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for ObjectStoreStorage {
    fn description(&self) -> String {
        match self.keys.prefix() {
            Some(prefix) => format!("{} (prefix {prefix:?})", self.description),
            None => self.description.clone(),
        }
    }

    async fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let dir_prefix = self.keys.dir_prefix(path);
        debug!("listing objects prefixed with {dir_prefix:?}");
        let location = self.location(path);
        let listing = self
            .store
            .list_with_delimiter(location.as_ref())
            .await
            .wrap_err_with(|| format!("failed to list {dir_prefix:?}"))?;

        if listing.objects.is_empty() && listing.common_prefixes.is_empty() {
            return Err(StorageError::PathNotFound(dir_prefix).into());
        }

        let files = listing.objects.iter().filter_map(|meta| {
            meta.location
                .to_string()
                .strip_prefix(&dir_prefix)
                .filter(|name| !name.is_empty())
                .map(String::from)
        });
        let dirs = listing.common_prefixes.iter().filter_map(|prefix| {
            prefix
                .to_string()
                .strip_prefix(&dir_prefix)
                .map(|name| format!("{name}/"))
        });

        Ok(files.chain(dirs).collect())
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        let location = self.require_location(path)?;
        debug!("checking if {location} exists");
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e).wrap_err_with(|| format!("failed to stat {location}")),
        }
    }

    async fn put_contents(&self, contents: &str, dest: &str) -> Result<()> {
        self.put_bytes(Bytes::from(contents.to_string()), dest)
            .await
    }

    async fn put_file(&self, src: &Path, dest: &str, _sync: bool) -> Result<()> {
        debug!("uploading {src:?} -> {dest}");
        let data = tokio::fs::read(src)
            .await
            .wrap_err_with(|| format!("failed to read {src:?}"))?;
        self.put_bytes(Bytes::from(data), dest).await
    }

    async fn get_contents(&self, path: &str) -> Result<Vec<u8>> {
        let location = self.require_location(path)?;
        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::PathNotFound(location.to_string()).into())
            }
            Err(e) => return Err(e).wrap_err_with(|| format!("failed to read {location}")),
        };

        Ok(result.bytes().await?.to_vec())
    }
}
