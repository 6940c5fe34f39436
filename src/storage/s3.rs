//! AWS S3 and S3-compatible object storage.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::client::Waiters;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use eyre::{Result, WrapErr};
use tracing::*;

use crate::util::config::StorageSection;

use super::{guess_content_type, ObjectKeys, Storage, StorageError};

pub const ACCESS_KEY_ENV: &str = "PP_S3_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "PP_S3_SECRET_KEY";
pub const SESSION_TOKEN_ENV: &str = "PP_S3_SESSION_TOKEN";

pub const DEFAULT_ACL: &str = "private";

/// How long a synced upload waits for the object to become visible.
const OBJECT_EXISTS_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl S3Credentials {
    /// Explicit credentials are only used when both the access and secret key
    /// are present; otherwise the SDK's default provider chain applies.
    pub fn from_env(env: &HashMap<String, String>) -> Option<Self> {
        match (env.get(ACCESS_KEY_ENV), env.get(SECRET_KEY_ENV)) {
            (Some(access_key), Some(secret_key)) => {
                debug!("{ACCESS_KEY_ENV}/{SECRET_KEY_ENV} found, using them for auth");
                Some(Self {
                    access_key: access_key.clone(),
                    secret_key: secret_key.clone(),
                    session_token: env.get(SESSION_TOKEN_ENV).cloned(),
                })
            }
            _ => {
                debug!("no PP_S3_* credentials, falling back to the default provider chain");
                None
            }
        }
    }
}

/// Everything needed to connect to a bucket, as read from `[aws-s3]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub prefix: Option<String>,
    pub acl: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub credentials: Option<S3Credentials>,
}

impl S3Settings {
    pub fn from_config(section: &StorageSection, env: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            bucket: section.require("bucket")?.to_string(),
            prefix: section.get("prefix").map(String::from),
            acl: section.get("acl").unwrap_or(DEFAULT_ACL).to_string(),
            endpoint: section.get("endpoint").map(String::from),
            region: section.get("region").map(String::from),
            credentials: S3Credentials::from_env(env),
        })
    }
}

pub struct S3Storage {
    client: Client,
    bucket: String,
    keys: ObjectKeys,
    acl: ObjectCannedAcl,
}

impl S3Storage {
    pub async fn from_config(
        section: &StorageSection,
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        Self::connect(S3Settings::from_config(section, env)?).await
    }

    pub async fn connect(settings: S3Settings) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        match &settings.credentials {
            Some(creds) => {
                info!("s3 auth: using explicitly passed credentials");
                loader = loader.credentials_provider(Credentials::new(
                    creds.access_key.clone(),
                    creds.secret_key.clone(),
                    creds.session_token.clone(),
                    None,
                    "pypi-private",
                ));
            }
            None => info!("s3 auth: using the default credential provider chain"),
        }
        let sdk_config = loader.load().await;

        // Custom endpoints are usually S3-compatible services that don't
        // route virtual-hosted bucket names.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint.is_some())
            .build();

        Ok(Self::new(
            Client::from_conf(s3_config),
            settings.bucket,
            settings.prefix.as_deref(),
            &settings.acl,
        ))
    }

    pub fn new(client: Client, bucket: String, prefix: Option<&str>, acl: &str) -> Self {
        Self {
            client,
            bucket,
            keys: ObjectKeys::new(prefix),
            acl: ObjectCannedAcl::from(acl),
        }
    }

    async fn wait_until_exists(&self, key: &str) -> Result<()> {
        debug!("waiting for s3://{}/{key} to exist", self.bucket);
        self.client
            .wait_until_object_exists()
            .bucket(&self.bucket)
            .key(key)
            .wait(OBJECT_EXISTS_TIMEOUT)
            .await
            .wrap_err_with(|| format!("s3://{}/{key} never became visible", self.bucket))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for S3Storage {
    fn description(&self) -> String {
        format!(
            "s3 bucket {} (prefix {:?})",
            self.bucket,
            self.keys.prefix().unwrap_or_default()
        )
    }

    async fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let prefix = self.keys.dir_prefix(path);
        debug!("listing objects prefixed with {prefix:?}");

        let mut files = vec![];
        let mut dirs = vec![];
        let mut continuation_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/");
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req.send().await.wrap_err("S3 ListObjectsV2")?;
            files.extend(resp.contents().iter().filter_map(|o| o.key()).map(String::from));
            dirs.extend(
                resp.common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .map(String::from),
            );

            match resp.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        // Nothing at all under the prefix means the "directory" doesn't exist
        if files.is_empty() && dirs.is_empty() {
            return Err(StorageError::PathNotFound(prefix).into());
        }

        let files = files
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|name| !name.is_empty())
            .map(String::from);
        let dirs = dirs
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(String::from);

        Ok(files.chain(dirs).collect())
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        let key = self.keys.key(path);
        debug!("checking if key exists: {key}");
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().map_or(false, |e| e.is_not_found()) => Ok(false),
            Err(err) => Err(err).wrap_err("S3 HeadObject"),
        }
    }

    async fn put_contents(&self, contents: &str, dest: &str) -> Result<()> {
        let key = self.keys.key(dest);
        debug!("writing content to s3: {key}");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(contents.as_bytes().to_vec()))
            .content_type(guess_content_type(dest))
            .acl(self.acl.clone())
            .send()
            .await
            .wrap_err("S3 PutObject")?;
        Ok(())
    }

    async fn put_file(&self, src: &Path, dest: &str, sync: bool) -> Result<()> {
        let key = self.keys.key(dest);
        debug!("uploading file to s3: {src:?} -> {key}");
        let body = ByteStream::from_path(src)
            .await
            .wrap_err_with(|| format!("failed to open {src:?} for upload"))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(guess_content_type(dest))
            .acl(self.acl.clone())
            .send()
            .await
            .wrap_err("S3 PutObject")?;

        if sync {
            self.wait_until_exists(&key).await?;
        }

        Ok(())
    }

    async fn get_contents(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.keys.key(path);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) if err.as_service_error().map_or(false, |e| e.is_no_such_key()) => {
                return Err(StorageError::PathNotFound(key).into())
            }
            Err(err) => return Err(err).wrap_err("S3 GetObject"),
        };

        let bytes = resp
            .body
            .collect()
            .await
            .wrap_err("read S3 GetObject body")?
            .into_bytes();

        Ok(bytes.to_vec())
    }
}
