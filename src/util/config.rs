use std::collections::HashMap;
use std::path::{Path, PathBuf};

use eyre::Result;
use ini::Ini;
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::*;

use super::expand_home;

pub const DEFAULT_CONFIG_PATH: &str = "~/.pypi-private.cfg";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("missing key `{key}` in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("unsupported storage \"{0}\"")]
    UnsupportedStorage(String),

    #[error("unsupported content hash \"{0}\" (expected \"none\" or \"sha256\")")]
    UnsupportedContentHash(String),
}

/// Storage backends that can be selected with `[storage] type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum StorageType {
    #[strum(serialize = "local-filesystem")]
    LocalFileSystem,
    #[strum(serialize = "aws-s3")]
    AwsS3,
    #[strum(serialize = "azure")]
    Azure,
}

/// Digest used to annotate package index links, set with
/// `[index] content_hash`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ContentHash {
    #[default]
    None,
    Sha256,
}

/// The parsed config file, plus a snapshot of the environment that
/// credentials are read from.
#[derive(Debug)]
pub struct PrivateIndexConfig {
    ini: Ini,
    env: HashMap<String, String>,
}

impl PrivateIndexConfig {
    pub async fn load(path: &Path, env: HashMap<String, String>) -> Result<Self> {
        let path = expand_home(path);
        info!("loading config from {}", path.display());
        let contents =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;

        Self::from_contents(&contents, env)
    }

    pub fn from_contents(contents: &str, env: HashMap<String, String>) -> Result<Self> {
        let ini = Ini::load_from_str(contents).map_err(ConfigError::Parse)?;
        Ok(Self { ini, env })
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn storage_type(&self) -> Result<StorageType> {
        let name = self
            .option("storage", "type")
            .ok_or_else(|| ConfigError::MissingKey {
                section: "storage".into(),
                key: "type".into(),
            })?;

        name.parse::<StorageType>()
            .map_err(|_| ConfigError::UnsupportedStorage(name.into()).into())
    }

    /// The section named after the selected storage type. A missing section
    /// is treated as empty; required keys are checked by the backend.
    pub fn storage_config(&self) -> Result<StorageSection> {
        let storage_type = self.storage_type()?;
        let name = storage_type.to_string();
        let values = self
            .ini
            .section(Some(name.as_str()))
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(StorageSection { name, values })
    }

    pub fn content_hash(&self) -> Result<ContentHash> {
        match self.option("index", "content_hash") {
            None => Ok(ContentHash::default()),
            Some(value) => value
                .trim()
                .to_lowercase()
                .parse::<ContentHash>()
                .map_err(|_| ConfigError::UnsupportedContentHash(value.into()).into()),
        }
    }

    /// Option names are case-insensitive; section names are not.
    fn option(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .section(Some(section))?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }
}

/// Key/value pairs of one storage backend's config section.
#[derive(Debug, Clone, Default)]
pub struct StorageSection {
    name: String,
    values: HashMap<String, String>,
}

impl StorageSection {
    pub fn new<S: Into<String>>(name: S, values: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            ConfigError::MissingKey {
                section: self.name.clone(),
                key: key.into(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const S3_CONFIG: &str = indoc! {"
        [storage]
        type = aws-s3

        [aws-s3]
        bucket = mybucket
        prefix = simple
        acl = public-read

        [index]
        content_hash = SHA256
    "};

    #[test]
    fn test_storage_section_is_selected_by_type() -> Result<()> {
        let config = PrivateIndexConfig::from_contents(S3_CONFIG, HashMap::new())?;
        assert_eq!(config.storage_type()?, StorageType::AwsS3);

        let section = config.storage_config()?;
        assert_eq!(section.require("bucket")?, "mybucket");
        assert_eq!(section.get("prefix"), Some("simple"));
        assert_eq!(section.get("acl"), Some("public-read"));
        assert_eq!(section.get("region"), None);
        assert_eq!(config.content_hash()?, ContentHash::Sha256);

        Ok(())
    }

    #[test]
    fn test_option_names_are_case_insensitive() -> Result<()> {
        let config = PrivateIndexConfig::from_contents(
            indoc! {"
                [storage]
                Type = local-filesystem

                [local-filesystem]
                Base_Path = /srv/simple

                [index]
                CONTENT_HASH = sha256
            "},
            HashMap::new(),
        )?;

        assert_eq!(config.storage_type()?, StorageType::LocalFileSystem);
        assert_eq!(config.storage_config()?.require("base_path")?, "/srv/simple");
        assert_eq!(config.content_hash()?, ContentHash::Sha256);

        let section = StorageSection::new(
            "aws-s3",
            HashMap::from([("Bucket".to_string(), "mybucket".to_string())]),
        );
        assert_eq!(section.get("bucket"), Some("mybucket"));

        Ok(())
    }

    #[test]
    fn test_missing_section_and_key() -> Result<()> {
        let config = PrivateIndexConfig::from_contents(
            "[storage]\ntype = local-filesystem\n",
            HashMap::new(),
        )?;
        let section = config.storage_config()?;
        let err = section.require("base_path").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingKey { section, key })
                if section == "local-filesystem" && key == "base_path"
        ));
        assert_eq!(config.content_hash()?, ContentHash::None);

        let config = PrivateIndexConfig::from_contents("[index]\n", HashMap::new())?;
        assert!(config.storage_type().is_err());

        Ok(())
    }

    #[test]
    fn test_unsupported_values_are_rejected() -> Result<()> {
        let config = PrivateIndexConfig::from_contents(
            "[storage]\ntype = gcs\n[index]\ncontent_hash = md5\n",
            HashMap::new(),
        )?;
        let err = config.storage_type().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnsupportedStorage(name)) if name == "gcs"
        ));
        assert!(config.content_hash().is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = PrivateIndexConfig::load(
            Path::new("/nonexistent/pypi-private.cfg"),
            HashMap::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Read { .. })
        ));
    }
}
